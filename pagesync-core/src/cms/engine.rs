//! Incremental CMS item maintenance and the cached content tree.
//!
//! [`CmsViewEngine::attach`] subscribes a listener to the repository. The
//! listener:
//! - purges the cached [`ContentTree`] on every `Changed` event (it is rebuilt
//!   on the next read);
//! - reacts to resource adds, updates and removals by re-deriving the CMS items
//!   of the affected slug and every ancestor slug in its breadcrumb;
//! - recomputes framing for every item when a header, navbar or footer changes.
//!
//! Re-derivation reads a slug index kept alongside the handlers, so touching
//! a slug only visits the pages filed at or below it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;
use tracing::{debug, info};

use super::item::{CmsFraming, CmsItem, CmsItemType};
use super::tree::{derive_node_type, ContentEntry, ContentTree, NodeType};
use super::{breadcrumb, cms_page, is_ancestor_or_self, strip_anchor, CmsPage, CmsPageType};
use crate::error::RepositoryError;
use crate::events::{RepositoryEvent, RepositoryListener};
use crate::model::{Resource, ResourceId};
use crate::registry::Registry;
use crate::repository::Repository;

/// Handle to the CMS view of one repository.
#[derive(Debug, Clone)]
pub struct CmsViewEngine {
    tree: Arc<Mutex<Option<ContentTree>>>,
}

impl CmsViewEngine {
    /// Subscribes the engine to `repository`.
    pub fn attach(repository: &mut Repository) -> Self {
        let tree = Arc::new(Mutex::new(None));
        let seen_cms_root = repository
            .registry()
            .ok()
            .map(|r| r.cms_database_id.clone());
        repository.subscribe(Box::new(CmsListener {
            tree: Arc::clone(&tree),
            seen_cms_root,
            index: None,
        }));
        Self { tree }
    }

    /// The slug tree, rebuilt if a change purged it.
    pub fn content_tree(&self, repository: &Repository) -> Result<ContentTree, RepositoryError> {
        let mut cached = self.tree.lock();
        if let Some(tree) = cached.as_ref() {
            return Ok(tree.clone());
        }
        let tree = ContentTree::build(repository.registry()?, Utc::now());
        debug!(nodes = tree.len(), "[CMS] Rebuilt content hierarchy");
        *cached = Some(tree.clone());
        Ok(tree)
    }

    pub fn is_cached(&self) -> bool {
        self.tree.lock().is_some()
    }
}

/// CMS pages of the configured database keyed by base slug, published or
/// not. Eligibility is checked again on read.
#[derive(Debug, Default)]
struct SlugIndex {
    by_slug: BTreeMap<String, BTreeSet<ResourceId>>,
}

impl SlugIndex {
    fn build(registry: &Registry) -> Self {
        let mut index = Self::default();
        for resource in registry.resources.values() {
            index.insert(resource, registry);
        }
        index
    }

    fn base_slug(resource: &Resource, registry: &Registry) -> Option<String> {
        let cms_root = registry.cms_database_id.as_ref()?;
        if resource.parent_resource_id() != Some(cms_root) {
            return None;
        }
        let properties = resource.cms_properties()?;
        Some(strip_anchor(&properties.slug(resource.title())).to_string())
    }

    fn insert(&mut self, resource: &Resource, registry: &Registry) {
        if let Some(slug) = Self::base_slug(resource, registry) {
            self.by_slug
                .entry(slug)
                .or_default()
                .insert(resource.id().clone());
        }
    }

    fn remove(&mut self, resource: &Resource, registry: &Registry) {
        let Some(slug) = Self::base_slug(resource, registry) else {
            return;
        };
        if let Some(ids) = self.by_slug.get_mut(&slug) {
            ids.remove(resource.id());
            if ids.is_empty() {
                self.by_slug.remove(&slug);
            }
        }
    }

    fn pages<'r>(
        &self,
        ids: impl Iterator<Item = &'r ResourceId>,
        registry: &'r Registry,
        now: DateTime<Utc>,
    ) -> Vec<CmsPage<'r>> {
        ids.filter_map(|id| registry.resources.get(id))
            .filter_map(|r| cms_page(r, registry, now))
            .collect()
    }

    /// Published pages filed at `slug` or below it.
    fn subtree<'r>(&'r self, registry: &'r Registry, slug: &str, now: DateTime<Utc>) -> Vec<CmsPage<'r>> {
        let ids = self
            .by_slug
            .range::<str, _>((Bound::Included(slug), Bound::Unbounded))
            .take_while(|(base, _)| base.starts_with(slug))
            .filter(|(base, _)| is_ancestor_or_self(slug, base))
            .flat_map(|(_, ids)| ids.iter());
        self.pages(ids, registry, now)
    }

    /// Published pages filed at `slug` or one of its ancestors.
    fn ancestry<'r>(&'r self, registry: &'r Registry, slug: &str, now: DateTime<Utc>) -> Vec<CmsPage<'r>> {
        let trail = breadcrumb(slug);
        let ids = trail
            .iter()
            .filter_map(|s| self.by_slug.get(s))
            .flat_map(|ids| ids.iter())
            .collect::<Vec<_>>();
        self.pages(ids.into_iter(), registry, now)
    }
}

struct CmsListener {
    tree: Arc<Mutex<Option<ContentTree>>>,
    /// `None` until the first event tells us which CMS database is configured.
    seen_cms_root: Option<Option<String>>,
    /// Built on first use, rebuilt when the CMS root changes.
    index: Option<SlugIndex>,
}

impl RepositoryListener for CmsListener {
    fn on_event(
        &mut self,
        event: &RepositoryEvent,
        registry: &mut Registry,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now();
        if let RepositoryEvent::Changed = event {
            *self.tree.lock() = None;
            let current = registry.cms_database_id.clone();
            match &self.seen_cms_root {
                Some(seen) if *seen != current => {
                    info!(cms_database_id = ?current, "[CMS] CMS root changed, reconciling all items");
                    let index = self.index.insert(SlugIndex::build(registry));
                    reconcile_all(registry, index, now);
                }
                _ => {}
            }
            self.seen_cms_root = Some(current);
            return Ok(());
        }

        let index = self
            .index
            .get_or_insert_with(|| SlugIndex::build(registry));
        match event {
            RepositoryEvent::ResourceAdded(resource) => {
                index.insert(resource, registry);
                let current = page_slot(resource, registry, now);
                on_page_changed(registry, index, resource, None, current, false, now);
            }
            RepositoryEvent::ResourceUpdated { previous, current } => {
                if !content_changed(previous, current) {
                    return Ok(());
                }
                index.remove(previous, registry);
                index.insert(current, registry);
                let before = page_slot(previous, registry, now);
                let after = page_slot(current, registry, now);
                on_page_changed(registry, index, current, before, after, true, now);
            }
            RepositoryEvent::ResourceRemoved(resource) => {
                index.remove(resource, registry);
                on_page_removed(registry, index, resource, now);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Page type and full slug of a resource when it is on the site.
type PageSlot = (CmsPageType, String);

fn page_slot(resource: &Resource, registry: &Registry, now: DateTime<Utc>) -> Option<PageSlot> {
    cms_page(resource, registry, now).map(|p| (p.page_type(), p.slug))
}

/// Render-only updates do not affect the CMS view.
fn content_changed(previous: &Resource, current: &Resource) -> bool {
    let mut a = previous.clone();
    let mut b = current.clone();
    a.header_mut().renders.clear();
    b.header_mut().renders.clear();
    a != b
}

fn on_page_changed(
    registry: &mut Registry,
    index: &SlugIndex,
    resource: &Resource,
    before: Option<PageSlot>,
    after: Option<PageSlot>,
    updated: bool,
    now: DateTime<Utc>,
) {
    if before.is_none() && after.is_none() {
        if updated {
            // Left the site through a parent or status change.
            strip_part(registry, index, resource.id(), now);
        }
        return;
    }

    let mut framing_changed = false;
    let mut slugs = BTreeSet::new();
    for (page_type, slug) in before.iter().chain(after.iter()) {
        if page_type.is_framing() {
            framing_changed = true;
            continue;
        }
        if *page_type == CmsPageType::Internal {
            continue;
        }
        slugs.extend(breadcrumb(strip_anchor(slug)));
    }

    if after.is_none() {
        strip_part(registry, index, resource.id(), now);
    }
    for slug in &slugs {
        touch(registry, index, slug, now);
    }
    if updated {
        for item in registry.cms_items.values_mut() {
            if item.references(resource.id()) && !item.dirty {
                debug!(slug = %item.slug, resource_id = %resource.id(), "[CMS] Marking item dirty");
                item.dirty = true;
            }
        }
    }
    if framing_changed {
        recalculate_framing(registry, index, now);
    }
}

fn on_page_removed(registry: &mut Registry, index: &SlugIndex, resource: &Resource, now: DateTime<Utc>) {
    let Some(properties) = resource.cms_properties() else {
        return;
    };
    strip_part(registry, index, resource.id(), now);
    let page_type = properties.page_type;
    if page_type.is_framing() {
        recalculate_framing(registry, index, now);
        return;
    }
    let slug = properties.slug(resource.title());
    for ancestor in breadcrumb(strip_anchor(&slug)) {
        touch(registry, index, &ancestor, now);
    }
}

/// Removes `id` from every item's parts. Emptied items are deleted and their
/// ancestor containers re-touched.
fn strip_part(registry: &mut Registry, index: &SlugIndex, id: &str, now: DateTime<Utc>) {
    let mut emptied = Vec::new();
    for item in registry.cms_items.values_mut() {
        let before = item.parts.len();
        item.parts.retain(|p| p != id);
        if item.parts.len() != before {
            item.dirty = true;
            if item.parts.is_empty() {
                emptied.push(item.slug.clone());
            }
        }
    }
    for slug in emptied {
        registry.cms_items.remove(&slug);
        info!(slug = %slug, "[CMS] Removed empty item");
        for ancestor in breadcrumb(&slug).into_iter().rev().skip(1) {
            touch(registry, index, &ancestor, now);
        }
    }
}

/// What lives at one slug: its own pages and its immediate children's pages.
struct SlugSnapshot {
    content: Vec<ContentEntry>,
    children: BTreeMap<String, Vec<ContentEntry>>,
    descendants: Vec<ContentEntry>,
}

impl SlugSnapshot {
    fn collect(pages: &[CmsPage<'_>], slug: &str) -> Self {
        let mut snapshot = Self {
            content: Vec::new(),
            children: BTreeMap::new(),
            descendants: Vec::new(),
        };
        for page in pages {
            let base = page.base_slug();
            if base == slug {
                snapshot.content.push(page.entry());
                continue;
            }
            if !is_ancestor_or_self(slug, base) {
                continue;
            }
            let rest = base[slug.len()..].trim_start_matches('/');
            let child_segment = rest.split('/').next().unwrap_or(rest);
            let child_slug = format!("{slug}/{child_segment}");
            let entries = snapshot.children.entry(child_slug.clone()).or_default();
            if base == child_slug {
                entries.push(page.entry());
            }
            if page.page_type().is_content() {
                snapshot.descendants.push(page.entry());
            }
        }
        let by_sequence = |a: &ContentEntry, b: &ContentEntry| {
            (super::sequence_key(a.sequence), &a.title).cmp(&(super::sequence_key(b.sequence), &b.title))
        };
        snapshot.content.sort_by(by_sequence);
        snapshot.descendants.sort_by(by_sequence);
        for entries in snapshot.children.values_mut() {
            entries.sort_by(by_sequence);
        }
        snapshot
    }

    /// The item this slug should hold, if any.
    fn desired_item(&self) -> Option<(CmsItemType, Vec<String>)> {
        let children: Vec<&[ContentEntry]> = self.children.values().map(Vec::as_slice).collect();
        let own = || {
            self.content
                .iter()
                .filter(|e| e.page_type.is_content())
                .map(|e| e.id.clone())
                .collect::<Vec<_>>()
        };
        match derive_node_type(&self.content, &children) {
            NodeType::Page => Some((CmsItemType::Page, own())),
            NodeType::SectionedPage => Some((CmsItemType::SectionedPage, own())),
            NodeType::Gallery => {
                let mut galleries: Vec<&ContentEntry> = self
                    .children
                    .values()
                    .flat_map(|entries| entries.iter())
                    .filter(|e| e.page_type == CmsPageType::Gallery)
                    .collect();
                galleries.sort_by(|a, b| {
                    (super::sequence_key(a.sequence), &a.title)
                        .cmp(&(super::sequence_key(b.sequence), &b.title))
                });
                Some((
                    CmsItemType::GalleryPage,
                    galleries.into_iter().map(|e| e.id.clone()).collect(),
                ))
            }
            NodeType::Book => {
                let mut parts = own();
                parts.extend(self.descendants.iter().map(|e| e.id.clone()));
                Some((CmsItemType::CategoryPage, parts))
            }
            NodeType::None => {
                // A lone gallery entry is still rendered as its own card page.
                let own = own();
                let is_card = own.len() == 1
                    && self
                        .content
                        .iter()
                        .any(|e| e.page_type == CmsPageType::Gallery);
                is_card.then_some((CmsItemType::Page, own))
            }
        }
    }
}

/// Re-derives the item at `slug`: creates, updates or removes it.
fn touch(registry: &mut Registry, index: &SlugIndex, slug: &str, now: DateTime<Utc>) {
    let (desired, framing) = {
        let pages = index.subtree(registry, slug, now);
        let desired = SlugSnapshot::collect(&pages, slug).desired_item();
        (desired, resolve_framing(&index.ancestry(registry, slug, now), slug))
    };

    let Some((item_type, parts)) = desired.filter(|(_, parts)| !parts.is_empty()) else {
        if registry.cms_items.remove(slug).is_some() {
            info!(slug, "[CMS] Removed item");
        }
        return;
    };

    match registry.cms_items.get_mut(slug) {
        Some(item) => {
            if item.item_type != item_type || item.parts != parts {
                debug!(slug, ?item_type, parts = parts.len(), "[CMS] Updated item");
                item.item_type = item_type;
                item.parts = parts;
                item.dirty = true;
            }
            if item.framing != framing {
                item.framing = framing;
                item.dirty = true;
            }
        }
        None => {
            info!(slug, ?item_type, parts = parts.len(), "[CMS] Created item");
            let mut item = CmsItem::new(slug, item_type, parts);
            item.framing = framing;
            registry.cms_items.insert(slug.to_string(), item);
        }
    }
}

/// Header, navbar and footer nearest to `slug` by breadcrumb ancestry.
fn resolve_framing(pages: &[CmsPage<'_>], slug: &str) -> CmsFraming {
    let nearest = |wanted: CmsPageType| {
        pages
            .iter()
            .filter(|p| p.page_type() == wanted && is_ancestor_or_self(p.base_slug(), slug))
            .max_by(|a, b| {
                a.base_slug().len().cmp(&b.base_slug().len()).then_with(|| {
                    // lower sequence wins a tie
                    super::sequence_key(b.properties.sequence)
                        .cmp(&super::sequence_key(a.properties.sequence))
                })
            })
            .map(|p| p.id().clone())
    };
    CmsFraming {
        header_id: nearest(CmsPageType::Header),
        menu_id: nearest(CmsPageType::NavBar),
        footer_id: nearest(CmsPageType::Footer),
    }
}

fn recalculate_framing(registry: &mut Registry, index: &SlugIndex, now: DateTime<Utc>) {
    let framings: Vec<(String, CmsFraming)> = registry
        .cms_items
        .keys()
        .map(|slug| {
            let framing = resolve_framing(&index.ancestry(registry, slug, now), slug);
            (slug.clone(), framing)
        })
        .collect();
    let mut changed = 0;
    for (slug, framing) in framings {
        if let Some(item) = registry.cms_items.get_mut(&slug) {
            if item.framing != framing {
                item.framing = framing;
                item.dirty = true;
                changed += 1;
            }
        }
    }
    info!(changed, "[CMS] Recalculated framing");
}

/// Re-derives every item from scratch.
fn reconcile_all(registry: &mut Registry, index: &SlugIndex, now: DateTime<Utc>) {
    let mut slugs: BTreeSet<String> = registry.cms_items.keys().cloned().collect();
    for page in index.subtree(registry, "", now) {
        if page.page_type().is_content() {
            slugs.extend(breadcrumb(page.base_slug()));
        }
    }
    for slug in &slugs {
        touch(registry, index, slug, now);
    }
    recalculate_framing(registry, index, now);
}
