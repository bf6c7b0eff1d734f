//! Repository change notifications.
//!
//! Every mutating repository call raises a pre event before the mutation is
//! applied and a post event after it. A listener that fails a pre event
//! cancels the mutation; the error is returned to the caller unchanged.

use crate::error::RepositoryError;
use crate::model::Resource;
use crate::registry::Registry;

#[derive(Debug, Clone)]
pub enum RepositoryEvent {
    Changing,
    Changed,
    ResourceAdding(Resource),
    ResourceAdded(Resource),
    ResourceUpdating {
        previous: Resource,
        current: Resource,
    },
    ResourceUpdated {
        previous: Resource,
        current: Resource,
    },
    ResourceRemoving(Resource),
    ResourceRemoved(Resource),
    Saving,
    Saved,
}

impl RepositoryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RepositoryEvent::Changing => "Changing",
            RepositoryEvent::Changed => "Changed",
            RepositoryEvent::ResourceAdding(_) => "ResourceAdding",
            RepositoryEvent::ResourceAdded(_) => "ResourceAdded",
            RepositoryEvent::ResourceUpdating { .. } => "ResourceUpdating",
            RepositoryEvent::ResourceUpdated { .. } => "ResourceUpdated",
            RepositoryEvent::ResourceRemoving(_) => "ResourceRemoving",
            RepositoryEvent::ResourceRemoved(_) => "ResourceRemoved",
            RepositoryEvent::Saving => "Saving",
            RepositoryEvent::Saved => "Saved",
        }
    }

    /// Pre events fire before the mutation is applied.
    pub fn is_pre(&self) -> bool {
        matches!(
            self,
            RepositoryEvent::Changing
                | RepositoryEvent::ResourceAdding(_)
                | RepositoryEvent::ResourceUpdating { .. }
                | RepositoryEvent::ResourceRemoving(_)
                | RepositoryEvent::Saving
        )
    }
}

/// Observer of repository lifecycle events.
///
/// Listeners receive the live registry so that derived state kept inside it
/// (CMS items) can be maintained in step with the change that caused it.
pub trait RepositoryListener: Send + Sync {
    fn on_event(
        &mut self,
        event: &RepositoryEvent,
        registry: &mut Registry,
    ) -> Result<(), RepositoryError>;
}
