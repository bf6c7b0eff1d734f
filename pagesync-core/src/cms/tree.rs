//! The slug content tree.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]; `parent` is a
//! back-reference, `children` is the owning edge. The tree is rooted at the
//! empty slug and every non-root node's parent is its slug with the last path
//! segment removed.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::{cms_pages, parent_slug, sequence_key, CmsPageType};
use crate::model::ResourceId;
use crate::registry::Registry;

pub type NodeId = usize;

/// Snapshot of a CMS page attached to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub id: ResourceId,
    pub title: String,
    pub page_type: CmsPageType,
    pub sequence: Option<i64>,
    pub categories: Vec<String>,
}

impl ContentEntry {
    fn sort_key(&self) -> ((bool, i64), &str) {
        (sequence_key(self.sequence), self.title.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    None,
    Page,
    SectionedPage,
    Gallery,
    Book,
}

/// Derives a node's type from its content and its children's content.
/// Framing and internal pages never take part in the decision.
pub fn derive_node_type(content: &[ContentEntry], children: &[&[ContentEntry]]) -> NodeType {
    let own: Vec<&ContentEntry> = content.iter().filter(|e| e.page_type.is_content()).collect();
    if own.is_empty() && children.is_empty() {
        return NodeType::None;
    }
    if own.len() == 1 && own[0].page_type == CmsPageType::Page {
        return NodeType::Page;
    }
    if !own.is_empty() && own.iter().all(|e| e.page_type == CmsPageType::Section) {
        return NodeType::SectionedPage;
    }
    let all_galleries = !children.is_empty()
        && children.iter().all(|child| {
            let mut entries = child.iter().filter(|e| e.page_type.is_content()).peekable();
            entries.peek().is_some() && entries.all(|e| e.page_type == CmsPageType::Gallery)
        });
    if all_galleries {
        return NodeType::Gallery;
    }
    if !children.is_empty() {
        return NodeType::Book;
    }
    NodeType::None
}

#[derive(Debug, Clone)]
pub struct ContentNode {
    pub slug: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub content: Vec<ContentEntry>,
}

#[derive(Debug, Clone)]
pub struct ContentTree {
    nodes: Vec<ContentNode>,
    by_slug: HashMap<String, NodeId>,
}

impl Default for ContentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentTree {
    pub const ROOT: NodeId = 0;

    pub fn new() -> Self {
        let root = ContentNode {
            slug: String::new(),
            parent: None,
            children: Vec::new(),
            content: Vec::new(),
        };
        Self {
            nodes: vec![root],
            by_slug: HashMap::from([(String::new(), Self::ROOT)]),
        }
    }

    /// Builds the full hierarchy from every CMS-eligible page.
    pub fn build(registry: &Registry, now: DateTime<Utc>) -> Self {
        let mut tree = Self::new();
        for page in cms_pages(registry, now) {
            let node = tree.ensure_node(page.base_slug());
            tree.nodes[node].content.push(page.entry());
        }
        tree.sort_node(Self::ROOT);
        tree
    }

    fn ensure_node(&mut self, slug: &str) -> NodeId {
        if let Some(&id) = self.by_slug.get(slug) {
            return id;
        }
        let parent = parent_slug(slug).map(|p| self.ensure_node(p)).unwrap_or(Self::ROOT);
        let id = self.nodes.len();
        self.nodes.push(ContentNode {
            slug: slug.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            content: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        self.by_slug.insert(slug.to_string(), id);
        id
    }

    /// Sorts content and children below `id`; returns the node's own sort key.
    fn sort_node(&mut self, id: NodeId) -> (bool, i64) {
        self.nodes[id].content.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let children = self.nodes[id].children.clone();
        let mut keyed: Vec<((bool, i64), NodeId)> = children
            .into_iter()
            .map(|child| (self.sort_node(child), child))
            .collect();
        keyed.sort();
        self.nodes[id].children = keyed.iter().map(|(_, child)| *child).collect();

        match self.nodes[id].content.first() {
            Some(entry) => sequence_key(entry.sequence),
            None => keyed.first().map(|(key, _)| *key).unwrap_or((true, 0)),
        }
    }

    pub fn node(&self, id: NodeId) -> &ContentNode {
        &self.nodes[id]
    }

    pub fn root(&self) -> &ContentNode {
        &self.nodes[Self::ROOT]
    }

    pub fn find(&self, slug: &str) -> Option<NodeId> {
        self.by_slug.get(slug).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1 && self.nodes[Self::ROOT].content.is_empty()
    }

    pub fn parent(&self, id: NodeId) -> Option<&ContentNode> {
        self.nodes[id].parent.map(|p| &self.nodes[p])
    }

    pub fn node_type(&self, id: NodeId) -> NodeType {
        let node = &self.nodes[id];
        let children: Vec<&[ContentEntry]> = node
            .children
            .iter()
            .map(|c| self.nodes[*c].content.as_slice())
            .collect();
        derive_node_type(&node.content, &children)
    }

    /// Title by precedence: first content page, category label at this depth,
    /// prettified last slug segment, `Home` for the root.
    pub fn title(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        if let Some(entry) = node.content.iter().find(|e| e.page_type.is_content()) {
            return entry.title.clone();
        }
        let Some(segment) = node.slug.rsplit('/').next().filter(|s| !s.is_empty()) else {
            return "Home".to_string();
        };
        let depth = node.slug.matches('/').count();
        if let Some(label) = self.category_label(id, depth, segment) {
            return label;
        }
        segment
            .split('-')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn category_label(&self, id: NodeId, depth: usize, segment: &str) -> Option<String> {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for entry in &self.nodes[current].content {
                if let Some(label) = entry.categories.get(depth - 1) {
                    if crate::paths::slugify(label) == segment {
                        return Some(label.clone());
                    }
                }
            }
            stack.extend(self.nodes[current].children.iter().rev());
        }
        None
    }

    /// Depth-first pre-order walk yielding `(depth, node)`.
    pub fn walk(&self) -> Vec<(usize, &ContentNode)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(0usize, Self::ROOT)];
        while let Some((depth, id)) = stack.pop() {
            out.push((depth, &self.nodes[id]));
            for child in self.nodes[id].children.iter().rev() {
                stack.push((depth + 1, *child));
            }
        }
        out
    }
}
