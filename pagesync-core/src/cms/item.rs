//! CMS items: derived, renderable composites keyed by slug.

use serde::{Deserialize, Serialize};

use crate::model::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmsItemType {
    Page,
    SectionedPage,
    CategoryPage,
    GalleryPage,
}

/// Framing resources resolved for an item by slug ancestry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CmsFraming {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_id: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_id: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer_id: Option<ResourceId>,
}

impl CmsFraming {
    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        [&self.header_id, &self.menu_id, &self.footer_id]
            .into_iter()
            .filter_map(Option::as_ref)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmsItem {
    pub slug: String,
    pub item_type: CmsItemType,
    /// Resources composing the item, in render order.
    pub parts: Vec<ResourceId>,
    #[serde(flatten)]
    pub framing: CmsFraming,
    /// Needs a re-render. Cleared only by the render step.
    #[serde(default)]
    pub dirty: bool,
    pub render_file_name: String,
}

impl CmsItem {
    pub fn new(slug: impl Into<String>, item_type: CmsItemType, parts: Vec<ResourceId>) -> Self {
        let slug = slug.into();
        Self {
            render_file_name: render_file_name(&slug),
            slug,
            item_type,
            parts,
            framing: CmsFraming::default(),
            dirty: true,
        }
    }

    /// True when the item embeds `id` as a part or as framing.
    pub fn references(&self, id: &str) -> bool {
        self.parts.iter().any(|p| p == id) || self.framing.ids().any(|f| f == id)
    }
}

/// `index.html` for the root, `<slug>.html` otherwise.
pub fn render_file_name(slug: &str) -> String {
    let trimmed = slug.trim_matches('/');
    if trimmed.is_empty() {
        "index.html".to_string()
    } else {
        format!("{trimmed}.html")
    }
}
