//! Error types for the repository and the sync orchestrator.

use std::path::PathBuf;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// What kind of entity a [`RepositoryError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Object,
    Graph,
    Resource,
    CmsItem,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Object => "object",
            EntityKind::Graph => "graph",
            EntityKind::Resource => "resource",
            EntityKind::CmsItem => "CMS item",
        };
        f.write_str(name)
    }
}

/// Errors raised by the object store and the resource repository.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("repository is not loaded")]
    NotLoaded,

    #[error("repository is already loaded")]
    AlreadyLoaded,

    #[error("an update scope is already open on this repository")]
    AlreadyInUpdate,

    #[error("no update scope is open on this repository")]
    NotInUpdate,

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("resource {id} is already registered")]
    AlreadyRegistered { id: String },

    #[error("resource quota exceeded: limit is {limit}")]
    QuotaExceeded { limit: usize },

    #[error("listener rejected {event}: {message}")]
    ListenerRejected { event: String, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RepositoryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn serde(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serde {
            path: path.into(),
            source,
        }
    }

    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Precondition and quota violations abort a run regardless of fault tolerance.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RepositoryError::NotLoaded
                | RepositoryError::AlreadyLoaded
                | RepositoryError::AlreadyInUpdate
                | RepositoryError::NotInUpdate
                | RepositoryError::QuotaExceeded { .. }
        )
    }
}

/// Errors raised while synchronising a remote node.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("remote fetch failed for {id}: {message}")]
    Remote { id: String, message: String },

    #[error("download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("render failed for {id}: {message}")]
    Render { id: String, message: String },

    #[error("synchronisation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Fatal errors are never swallowed by fault-tolerant runs.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Repository(e) => e.is_fatal(),
            SyncError::Cancelled => true,
            _ => false,
        }
    }
}
