#![doc = "pagesync-core: core logic library for pagesync."]

//! This crate contains the data model, storage and synchronisation logic of
//! pagesync: the object & graph store, the resource repository and its event
//! protocol, the sync orchestrator and the CMS view engine. Talking to the
//! remote API and producing markup are left to implementors of the traits in
//! [`contract`].
//!
//! # Usage
//! Open or initialise a [`repository::Repository`], attach a
//! [`cms::CmsViewEngine`] if the site view is wanted, and drive
//! [`synchronise::Synchroniser::sync`] with a remote source and a renderer.

pub mod cms;
pub mod config;
pub mod contract;
pub mod download;
pub mod error;
pub mod events;
pub mod model;
pub mod objects;
pub mod paths;
pub mod quota;
pub mod registry;
pub mod repository;
pub mod shared;
pub mod store;
pub mod synchronise;

pub use error::{RepositoryError, Result, SyncError};
pub use repository::Repository;
