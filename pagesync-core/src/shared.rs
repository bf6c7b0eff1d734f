//! Reader/writer-lock decorator over a [`Repository`].
//!
//! Many threads may read concurrently while a single writer mutates. Locks are
//! synchronous: never hold a guard across an `.await`.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

use crate::error::Result;
use crate::model::Resource;
use crate::repository::Repository;

#[derive(Debug, Clone)]
pub struct SharedRepository {
    inner: Arc<RwLock<Repository>>,
}

impl SharedRepository {
    pub fn new(repository: Repository) -> Self {
        Self {
            inner: Arc::new(RwLock::new(repository)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Repository> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Repository> {
        self.inner.write()
    }

    /// Runs `f` with exclusive access.
    pub fn with_write<T>(&self, f: impl FnOnce(&mut Repository) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.write();
        f(&mut guard)
    }

    pub fn resource(&self, id: &str) -> Result<Resource> {
        self.inner.read().resource(id).cloned()
    }

    pub fn resource_ids(&self) -> Result<Vec<String>> {
        let guard = self.inner.read();
        let ids = guard.resources()?.map(|r| r.id().clone()).collect();
        Ok(ids)
    }
}
