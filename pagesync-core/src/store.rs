//! Content-addressed persistence of raw objects and object graphs.
//!
//! One JSON file per ID, at a path derived from the ID. Writes go to a
//! temporary file in the destination folder which is then renamed over the
//! target, so a reader never observes a half-written object. There is no
//! caching here; the repository decides what to keep in memory.

use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{EntityKind, RepositoryError, Result};
use crate::objects::{ObjectGraph, RawObject};
use crate::paths::PathResolver;

#[derive(Debug, Clone)]
pub struct ObjectStore {
    paths: PathResolver,
}

impl ObjectStore {
    pub fn new(paths: PathResolver) -> Self {
        Self { paths }
    }

    pub fn put_object(&self, object: &RawObject) -> Result<()> {
        write_json_atomic(&self.paths.object_path(&object.id), object)
    }

    pub fn get_object(&self, id: &str) -> Result<RawObject> {
        read_json(&self.paths.object_path(id), EntityKind::Object, id)
    }

    pub fn contains_object(&self, id: &str) -> bool {
        self.paths.object_path(id).is_file()
    }

    pub fn delete_object(&self, id: &str) -> Result<()> {
        remove_if_exists(&self.paths.object_path(id))
    }

    pub fn put_graph(&self, graph: &ObjectGraph) -> Result<()> {
        write_json_atomic(&self.paths.graph_path(&graph.object_id), graph)
    }

    /// Fails with `NotFound` when no graph was stored for `id`.
    pub fn get_graph(&self, id: &str) -> Result<ObjectGraph> {
        read_json(&self.paths.graph_path(id), EntityKind::Graph, id)
    }

    pub fn contains_graph(&self, id: &str) -> bool {
        self.paths.graph_path(id).is_file()
    }

    pub fn delete_graph(&self, id: &str) -> Result<()> {
        remove_if_exists(&self.paths.graph_path(id))
    }
}

/// Serialises `value` and atomically replaces `path` with it.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| RepositoryError::serde(path, e))?;
    write_bytes_atomic(path, &bytes)
}

pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(&parent).map_err(|e| RepositoryError::io(&parent, e))?;

    let mut temp =
        tempfile::NamedTempFile::new_in(&parent).map_err(|e| RepositoryError::io(&parent, e))?;
    temp.write_all(bytes)
        .map_err(|e| RepositoryError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| RepositoryError::io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| RepositoryError::io(path, e.error))?;
    debug!(path = %path.display(), bytes = bytes.len(), "[STORE] Wrote file");
    Ok(())
}

/// Atomically replaces `dest` with a copy of `source`.
pub(crate) fn copy_atomic(source: &Path, dest: &Path) -> Result<()> {
    let bytes = fs::read(source).map_err(|e| RepositoryError::io(source, e))?;
    write_bytes_atomic(dest, &bytes)
}

fn read_json<T: DeserializeOwned>(path: &Path, kind: EntityKind, id: &str) -> Result<T> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RepositoryError::not_found(kind, id));
        }
        Err(e) => return Err(RepositoryError::io(path, e)),
    };
    serde_json::from_slice(&content).map_err(|e| RepositoryError::serde(path, e))
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RepositoryError::io(path, e)),
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
