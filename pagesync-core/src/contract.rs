//! # contract: collaborator interfaces of the sync orchestrator
//!
//! Two traits sit at the boundary between the core and the outside world:
//! - [`RemoteSource`]: the remote content API (node headers, full content,
//!   paginated database rows, binary downloads);
//! - [`Renderer`]: turns a resource or a CMS item into markup.
//!
//! Both return boxed errors so implementors can surface whatever their
//! transport or template engine produces. Both are annotated for `mockall`;
//! enable the `test-export-mocks` feature to use the mocks from other crates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::cms::CmsItem;
use crate::model::{RenderKind, Resource, ResourceId};
use crate::objects::{ObjectGraph, ObjectKind, ObjectMap, RawObject};

/// Error type for [`RemoteSource`].
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for [`Renderer`].
pub type RenderError = Box<dyn std::error::Error + Send + Sync>;

/// Render slugs of the resources a page links to, keyed by resource ID.
pub type LinkMap = BTreeMap<ResourceId, String>;

/// Lightweight metadata of a remote node.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteHeader {
    pub id: String,
    pub kind: ObjectKind,
    pub last_edited_time: Option<DateTime<Utc>>,
}

/// Everything fetched for one page or database.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    /// The page or database object itself.
    pub root: RawObject,
    /// Every descendant object in `graph`, root excluded.
    pub objects: Vec<RawObject>,
    pub graph: ObjectGraph,
}

/// One page of database rows.
#[derive(Debug, Clone, Default)]
pub struct ChildBatch {
    pub objects: Vec<RawObject>,
    /// Continuation cursor; `None` on the last page.
    pub next_cursor: Option<String>,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_header(&self, id: &str) -> Result<RemoteHeader, SourceError>;

    /// Fetches the node and its entire block tree.
    async fn fetch_full(&self, id: &str) -> Result<FetchedContent, SourceError>;

    /// Lists rows of a database, optionally only those edited after `since`.
    async fn enumerate_children(
        &self,
        database_id: &str,
        since: Option<DateTime<Utc>>,
        cursor: Option<String>,
    ) -> Result<ChildBatch, SourceError>;

    /// Fetches the full property values of a database row.
    async fn fetch_properties(&self, page_id: &str) -> Result<Map<String, Value>, SourceError>;

    async fn download_binary(&self, url: &str, dest: &Path) -> Result<(), SourceError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Renderer: Send + Sync {
    /// `links` resolves every child page or database in `graph` that has a
    /// render of `kind`, placeholders included.
    fn render_resource(
        &self,
        resource: &Resource,
        graph: &ObjectGraph,
        objects: &ObjectMap,
        links: &LinkMap,
        kind: RenderKind,
    ) -> Result<String, RenderError>;

    /// `parts` and `framing` are resolved in item order; missing resources
    /// are skipped.
    fn render_cms_item(
        &self,
        item: &CmsItem,
        parts: &[Resource],
        framing: &[Resource],
    ) -> Result<String, RenderError>;
}

/// Escapes text for use in HTML element bodies and quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
