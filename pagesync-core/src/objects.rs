//! Raw source objects and structural graphs.
//!
//! A [`RawObject`] is an immutable snapshot of one remote node exactly as it was
//! fetched. An [`ObjectGraph`] mirrors the structural children of one top-level
//! resource: the blocks of a page, or the row order of a database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque identifier of a remote node.
pub type ObjectId = String;

/// Objects loaded for one resource, keyed by ID.
pub type ObjectMap = HashMap<ObjectId, RawObject>;

/// Normalises a remote identifier.
///
/// Bare 32-digit hex IDs are expanded to hyphenated UUIDs so that the same node
/// is never registered twice under two spellings. Anything else is kept as is.
pub fn normalize_id(id: &str) -> ObjectId {
    let trimmed = id.trim();
    match uuid::Uuid::parse_str(trimmed) {
        Ok(parsed) => parsed.hyphenated().to_string(),
        Err(_) => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Page,
    Database,
    Block,
    User,
    Workspace,
}

/// The structural parent of a remote node, as reported by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ParentRef {
    Workspace(ObjectId),
    Page(ObjectId),
    Database(ObjectId),
    Block(ObjectId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited_time: Option<DateTime<Utc>>,
    /// Block type for `Block` objects, e.g. `paragraph`, `image`, `child_page`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    /// Attached file for file/image/pdf/video blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Plain text of the block, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Row properties for database pages, name to simplified value.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl RawObject {
    pub fn new(id: impl Into<ObjectId>, kind: ObjectKind) -> Self {
        Self {
            id: id.into(),
            kind,
            parent: None,
            title: None,
            created_time: None,
            last_edited_time: None,
            block_type: None,
            cover_url: None,
            icon_url: None,
            file_url: None,
            text: None,
            properties: serde_json::Map::new(),
        }
    }

    /// True for objects that become resources of their own.
    pub fn is_resource_root(&self) -> bool {
        matches!(self.kind, ObjectKind::Page | ObjectKind::Database)
    }

    /// Every remote file URL this object cites, in a stable order.
    pub fn file_urls(&self) -> Vec<&str> {
        [&self.cover_url, &self.icon_url, &self.file_url]
            .into_iter()
            .filter_map(|u| u.as_deref())
            .collect()
    }
}

/// One node of an object graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectGraph {
    pub object_id: ObjectId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ObjectGraph>,
}

impl ObjectGraph {
    pub fn leaf(object_id: impl Into<ObjectId>) -> Self {
        Self {
            object_id: object_id.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(object_id: impl Into<ObjectId>, children: Vec<ObjectGraph>) -> Self {
        Self {
            object_id: object_id.into(),
            children,
        }
    }

    /// All object IDs in depth-first pre-order, root included.
    pub fn object_ids(&self) -> Vec<&ObjectId> {
        let mut ids = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            ids.push(&node.object_id);
            stack.extend(node.children.iter().rev());
        }
        ids
    }

    /// Child resource roots (pages, databases) reachable without crossing
    /// into another resource, in document order.
    pub fn child_resources<'a>(&'a self, objects: &'a ObjectMap) -> Vec<&'a RawObject> {
        let mut found = Vec::new();
        for child in &self.children {
            collect_resource_roots(child, objects, &mut found);
        }
        found
    }
}

fn collect_resource_roots<'a>(
    node: &'a ObjectGraph,
    objects: &'a ObjectMap,
    found: &mut Vec<&'a RawObject>,
) {
    match objects.get(&node.object_id) {
        Some(object) if object.is_resource_root() => found.push(object),
        _ => {
            for child in &node.children {
                collect_resource_roots(child, objects, found);
            }
        }
    }
}
