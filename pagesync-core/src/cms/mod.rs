//! CMS view engine.
//!
//! When the registry names a CMS database, its rows become CMS pages. This
//! module keeps two derived views of them:
//! - a slug-keyed [`ContentTree`], rebuilt from scratch after any repository
//!   change ([`tree`]);
//! - [`CmsItem`]s, the composite renderable units, maintained incrementally by
//!   per-page-type event handlers ([`engine`]).

pub mod engine;
pub mod item;
pub mod properties;
pub mod tree;

use chrono::{DateTime, Utc};

use crate::model::{Resource, ResourceId};
use crate::objects::{ObjectGraph, ObjectMap};
use crate::registry::Registry;

pub use engine::CmsViewEngine;
pub use item::{CmsFraming, CmsItem, CmsItemType};
pub use properties::{normalize_slug, CmsPageType, CmsProperties};
pub use tree::{ContentEntry, ContentNode, ContentTree, NodeId, NodeType};

/// A CMS-eligible page with its computed slug.
#[derive(Debug, Clone)]
pub struct CmsPage<'a> {
    pub resource: &'a Resource,
    pub properties: &'a CmsProperties,
    pub slug: String,
}

impl<'a> CmsPage<'a> {
    pub fn id(&self) -> &'a ResourceId {
        self.resource.id()
    }

    pub fn page_type(&self) -> CmsPageType {
        self.properties.page_type
    }

    /// Slug with any `#anchor` removed.
    pub fn base_slug(&self) -> &str {
        strip_anchor(&self.slug)
    }

    pub fn entry(&self) -> ContentEntry {
        ContentEntry {
            id: self.id().clone(),
            title: self.resource.title().to_string(),
            page_type: self.page_type(),
            sequence: self.properties.sequence,
            categories: self.properties.categories.clone(),
        }
    }
}

/// Returns the page view of `resource` when it belongs on the site.
pub fn cms_page<'a>(
    resource: &'a Resource,
    registry: &Registry,
    now: DateTime<Utc>,
) -> Option<CmsPage<'a>> {
    let cms_root = registry.cms_database_id.as_ref()?;
    if resource.parent_resource_id() != Some(cms_root) {
        return None;
    }
    let properties = resource.cms_properties()?;
    if !properties.is_published(now) {
        return None;
    }
    Some(CmsPage {
        resource,
        properties,
        slug: properties.slug(resource.title()),
    })
}

/// Every CMS-eligible page in the registry.
pub fn cms_pages(registry: &Registry, now: DateTime<Utc>) -> Vec<CmsPage<'_>> {
    registry
        .resources
        .values()
        .filter_map(|r| cms_page(r, registry, now))
        .collect()
}

pub fn strip_anchor(slug: &str) -> &str {
    slug.split_once('#').map(|(base, _)| base).unwrap_or(slug)
}

/// The slug with its last `/`-segment removed; `None` for the root.
pub fn parent_slug(slug: &str) -> Option<&str> {
    if slug.is_empty() {
        return None;
    }
    Some(slug.rsplit_once('/').map(|(parent, _)| parent).unwrap_or(""))
}

/// All slugs from the root down to `slug`, inclusive.
pub fn breadcrumb(slug: &str) -> Vec<String> {
    let mut trail = vec![slug.to_string()];
    let mut current = slug;
    while let Some(parent) = parent_slug(current) {
        trail.push(parent.to_string());
        current = parent;
    }
    trail.reverse();
    trail
}

/// True when `ancestor` is `slug` or one of its breadcrumb ancestors.
pub fn is_ancestor_or_self(ancestor: &str, slug: &str) -> bool {
    ancestor.is_empty()
        || slug == ancestor
        || slug
            .strip_prefix(ancestor)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

pub const SUMMARY_LENGTH: usize = 200;

/// First non-empty paragraph of a page, cut to [`SUMMARY_LENGTH`] characters.
pub fn default_summary(graph: &ObjectGraph, objects: &ObjectMap) -> Option<String> {
    graph
        .object_ids()
        .into_iter()
        .skip(1)
        .filter_map(|id| objects.get(id))
        .filter(|o| o.block_type.as_deref() == Some("paragraph"))
        .filter_map(|o| o.text.as_deref().map(str::trim))
        .find(|text| !text.is_empty())
        .map(|text| {
            let cut: String = text.chars().take(SUMMARY_LENGTH).collect();
            cut.trim_end().to_string()
        })
}

/// Sort key placing pages without a sequence last.
pub fn sequence_key(sequence: Option<i64>) -> (bool, i64) {
    (sequence.is_none(), sequence.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breadcrumb_walks_up_to_root() {
        assert_eq!(breadcrumb("/docs/setup"), vec!["", "/docs", "/docs/setup"]);
        assert_eq!(breadcrumb(""), vec![""]);
        assert_eq!(parent_slug("/docs"), Some(""));
        assert_eq!(parent_slug(""), None);
    }

    #[test]
    fn ancestry_respects_segment_boundaries() {
        assert!(is_ancestor_or_self("/docs", "/docs/setup"));
        assert!(is_ancestor_or_self("", "/anything"));
        assert!(!is_ancestor_or_self("/doc", "/docs/setup"));
    }

    #[test]
    fn missing_sequence_sorts_last() {
        let mut keys = vec![sequence_key(None), sequence_key(Some(5)), sequence_key(Some(-1))];
        keys.sort();
        assert_eq!(keys.last(), Some(&(true, 0)));
        assert_eq!(strip_anchor("/docs#intro"), "/docs");
    }

    #[test]
    fn summary_takes_first_paragraph_text() {
        use crate::objects::{ObjectKind, RawObject};

        let mut heading = RawObject::new("h", ObjectKind::Block);
        heading.block_type = Some("heading_1".into());
        heading.text = Some("Title".into());
        let mut blank = RawObject::new("b", ObjectKind::Block);
        blank.block_type = Some("paragraph".into());
        blank.text = Some("   ".into());
        let mut para = RawObject::new("t", ObjectKind::Block);
        para.block_type = Some("paragraph".into());
        para.text = Some("x".repeat(300));

        let graph = ObjectGraph::with_children(
            "p",
            vec![ObjectGraph::leaf("h"), ObjectGraph::leaf("b"), ObjectGraph::leaf("t")],
        );
        let objects: ObjectMap = [heading, blank, para]
            .into_iter()
            .map(|o| (o.id.clone(), o))
            .collect();

        let summary = default_summary(&graph, &objects).unwrap();
        assert_eq!(summary.len(), SUMMARY_LENGTH);
        assert_eq!(default_summary(&ObjectGraph::leaf("p"), &objects), None);
    }
}
