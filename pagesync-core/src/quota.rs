//! Resource quota: a listener that refuses new resources past a limit.

use tracing::warn;

use crate::error::RepositoryError;
use crate::events::{RepositoryEvent, RepositoryListener};
use crate::model::ResourceType;
use crate::registry::Registry;

#[derive(Debug, Clone)]
pub struct ResourceQuota {
    max_pages: usize,
}

impl ResourceQuota {
    /// Limits the number of page and database resources.
    pub fn new(max_pages: usize) -> Self {
        Self { max_pages }
    }
}

impl RepositoryListener for ResourceQuota {
    fn on_event(
        &mut self,
        event: &RepositoryEvent,
        registry: &mut Registry,
    ) -> Result<(), RepositoryError> {
        let RepositoryEvent::ResourceAdding(resource) = event else {
            return Ok(());
        };
        if !matches!(
            resource.resource_type(),
            ResourceType::Page | ResourceType::Database
        ) {
            return Ok(());
        }
        let current =
            registry.count_of(ResourceType::Page) + registry.count_of(ResourceType::Database);
        if current >= self.max_pages {
            warn!(
                resource_id = %resource.id(),
                limit = self.max_pages,
                "[REPO] Resource quota reached, refusing new resource"
            );
            return Err(RepositoryError::QuotaExceeded {
                limit: self.max_pages,
            });
        }
        Ok(())
    }
}
