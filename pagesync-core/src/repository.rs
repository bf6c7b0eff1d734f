//! The resource repository.
//!
//! Owns the registry of typed resources, their render records and the CMS
//! items derived from them, composes the [`ObjectStore`], and raises
//! [`RepositoryEvent`]s around every mutation.
//!
//! # Lifecycle
//! - [`Repository::open`] binds a root folder; [`Repository::load`] reads the
//!   registry and sweeps out resources whose files went missing.
//! - Every other operation fails with [`RepositoryError::NotLoaded`] until
//!   `load` (or [`Repository::init`]) succeeded.
//! - Mutations only mark the registry dirty. It is written by [`Repository::save`],
//!   or once when an update scope closes ([`Repository::end_update`]).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cms::CmsItem;
use crate::error::{EntityKind, RepositoryError, Result};
use crate::events::{RepositoryEvent, RepositoryListener};
use crate::model::{RenderEntry, RenderKind, Resource, ResourceId, ResourceType};
use crate::objects::{ObjectGraph, ObjectMap, ParentRef};
use crate::paths::{PathProfile, PathResolver};
use crate::registry::Registry;
use crate::store::{self, ObjectStore};

/// Upper bound on parent hops during ancestry resolution.
const MAX_ANCESTRY_DEPTH: usize = 256;

pub struct Repository {
    root: PathBuf,
    paths: PathResolver,
    store: ObjectStore,
    registry: Option<Registry>,
    listeners: Vec<Box<dyn RepositoryListener>>,
    dirty: bool,
    in_update: bool,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.root)
            .field("profile", &self.paths.profile())
            .field("loaded", &self.registry.is_some())
            .field("listeners", &self.listeners.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Repository {
    /// Binds a repository root without reading anything.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let paths = PathResolver::new(&root, PathProfile::default());
        Self {
            store: ObjectStore::new(paths.clone()),
            root,
            paths,
            registry: None,
            listeners: Vec::new(),
            dirty: false,
            in_update: false,
        }
    }

    /// Creates a new, empty repository on disk and returns it loaded.
    pub fn init(
        root: impl Into<PathBuf>,
        profile: PathProfile,
        cms_database_id: Option<ResourceId>,
    ) -> Result<Self> {
        let mut repo = Self::open(root);
        let registry_path = repo.paths.registry_path();
        if registry_path.exists() {
            return Err(RepositoryError::io(
                &registry_path,
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "a repository already exists here",
                ),
            ));
        }
        let registry = Registry {
            path_profile: profile,
            cms_database_id,
            ..Registry::default()
        };
        repo.apply_profile(profile);
        store::write_json_atomic(&registry_path, &registry)?;
        repo.registry = Some(registry);
        info!(root = %repo.root.display(), ?profile, "[REPO] Initialised new repository");
        Ok(repo)
    }

    pub fn subscribe(&mut self, listener: Box<dyn RepositoryListener>) {
        self.listeners.push(listener);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn is_loaded(&self) -> bool {
        self.registry.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn check_loaded(&self) -> Result<()> {
        if self.registry.is_none() {
            return Err(RepositoryError::NotLoaded);
        }
        Ok(())
    }

    pub fn check_not_loaded(&self) -> Result<()> {
        if self.registry.is_some() {
            return Err(RepositoryError::AlreadyLoaded);
        }
        Ok(())
    }

    pub fn registry(&self) -> Result<&Registry> {
        self.registry.as_ref().ok_or(RepositoryError::NotLoaded)
    }

    fn registry_mut(&mut self) -> Result<&mut Registry> {
        self.registry.as_mut().ok_or(RepositoryError::NotLoaded)
    }

    fn apply_profile(&mut self, profile: PathProfile) {
        self.paths = PathResolver::new(&self.root, profile);
        self.store = ObjectStore::new(self.paths.clone());
    }

    /// Reads the registry, then deregisters every resource whose files are gone.
    pub fn load(&mut self) -> Result<()> {
        self.check_not_loaded()?;
        let registry_path = self.paths.registry_path();
        let content =
            fs::read(&registry_path).map_err(|e| RepositoryError::io(&registry_path, e))?;
        let registry: Registry = serde_json::from_slice(&content)
            .map_err(|e| RepositoryError::serde(&registry_path, e))?;
        info!(
            root = %self.root.display(),
            resources = registry.resources.len(),
            cms_items = registry.cms_items.len(),
            "[REPO] Loaded registry"
        );
        self.apply_profile(registry.path_profile);
        self.registry = Some(registry);
        self.sweep_missing_resources()
    }

    fn sweep_missing_resources(&mut self) -> Result<()> {
        let registry = self.registry()?;
        let missing: Vec<ResourceId> = registry
            .resources
            .values()
            .filter(|r| !self.resource_files_present(r))
            .map(|r| r.id().clone())
            .collect();
        for id in missing {
            warn!(resource_id = %id, "[REPO] Resource files missing, deregistering");
            if self.registry()?.resources.contains_key(&id) {
                self.remove_resource(&id, false)?;
            }
        }
        Ok(())
    }

    fn resource_files_present(&self, resource: &Resource) -> bool {
        match self
            .paths
            .resource_folder(resource.resource_type(), resource.id())
        {
            Some(folder) => fs::read_dir(self.root.join(folder))
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false),
            None => {
                let renders = &resource.header().renders;
                renders.is_empty()
                    || renders
                        .values()
                        .any(|r| self.root.join(&r.local_path).exists())
            }
        }
    }

    pub fn save(&mut self) -> Result<()> {
        self.check_loaded()?;
        self.emit(RepositoryEvent::Saving)?;
        let registry_path = self.paths.registry_path();
        store::write_json_atomic(&registry_path, self.registry()?)?;
        self.dirty = false;
        debug!(path = %registry_path.display(), "[REPO] Saved registry");
        self.emit(RepositoryEvent::Saved)
    }

    /// Opens the single, non-reentrant update scope.
    pub fn begin_update(&mut self) -> Result<()> {
        self.check_loaded()?;
        if self.in_update {
            return Err(RepositoryError::AlreadyInUpdate);
        }
        self.in_update = true;
        Ok(())
    }

    /// Closes the update scope, saving once if anything changed. Returns
    /// whether the registry was written.
    pub fn end_update(&mut self) -> Result<bool> {
        if !self.in_update {
            return Err(RepositoryError::NotInUpdate);
        }
        self.in_update = false;
        if self.dirty {
            self.save()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn in_update(&self) -> bool {
        self.in_update
    }

    fn emit(&mut self, event: RepositoryEvent) -> Result<()> {
        let registry = self.registry.as_mut().ok_or(RepositoryError::NotLoaded)?;
        for listener in self.listeners.iter_mut() {
            listener.on_event(&event, registry)?;
        }
        Ok(())
    }

    /// Raises `Changing` and the pre-event. A listener veto closes the pair
    /// with `Changed` before the error is returned.
    fn emit_pre(&mut self, event: RepositoryEvent) -> Result<()> {
        self.emit(RepositoryEvent::Changing)?;
        if let Err(e) = self.emit(event) {
            self.emit(RepositoryEvent::Changed)?;
            return Err(e);
        }
        Ok(())
    }

    pub fn find_resource(&self, id: &str) -> Result<Option<&Resource>> {
        Ok(self.registry()?.resources.get(id))
    }

    pub fn resource(&self, id: &str) -> Result<&Resource> {
        self.find_resource(id)?
            .ok_or_else(|| RepositoryError::not_found(EntityKind::Resource, id))
    }

    pub fn resources(&self) -> Result<impl Iterator<Item = &Resource>> {
        Ok(self.registry()?.resources.values())
    }

    pub fn child_resource_ids(&self, id: &str) -> Result<Vec<ResourceId>> {
        Ok(self
            .registry()?
            .children_of(id)
            .map(|r| r.id().clone())
            .collect())
    }

    pub fn cms_items(&self) -> Result<impl Iterator<Item = &CmsItem>> {
        Ok(self.registry()?.cms_items.values())
    }

    pub fn set_cms_database_id(&mut self, id: Option<ResourceId>) -> Result<()> {
        self.emit(RepositoryEvent::Changing)?;
        self.registry_mut()?.cms_database_id = id;
        self.dirty = true;
        self.emit(RepositoryEvent::Changed)
    }

    /// Walks the raw-object parent chain of `object_id`, skipping block
    /// parents, to the nearest registered page, database or workspace.
    pub fn resolve_ancestry(&self, object_id: &str) -> Result<Option<ResourceId>> {
        let registry = self.registry()?;
        let mut current = match self.store.get_object(object_id) {
            Ok(object) => object.parent,
            Err(RepositoryError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut seen = HashSet::new();
        for _ in 0..MAX_ANCESTRY_DEPTH {
            let parent = match current.take() {
                Some(parent) => parent,
                None => return Ok(None),
            };
            match parent {
                ParentRef::Page(id) | ParentRef::Database(id) | ParentRef::Workspace(id) => {
                    return Ok(registry.is_container(&id).then_some(id));
                }
                ParentRef::Block(block_id) => {
                    if !seen.insert(block_id.clone()) {
                        warn!(object_id, block_id = %block_id, "[REPO] Cycle in block ancestry");
                        return Ok(None);
                    }
                    current = match self.store.get_object(&block_id) {
                        Ok(block) => block.parent,
                        Err(RepositoryError::NotFound { .. }) => {
                            debug!(object_id, block_id = %block_id, "[REPO] Ancestry block not stored");
                            return Ok(None);
                        }
                        Err(e) => return Err(e),
                    };
                }
            }
        }
        warn!(object_id, "[REPO] Ancestry chain too deep, leaving parent unset");
        Ok(None)
    }

    fn resolve_parent(&self, resource: &Resource) -> Result<Option<ResourceId>> {
        if self.store.contains_object(resource.id()) {
            return self.resolve_ancestry(resource.id());
        }
        let registry = self.registry()?;
        Ok(resource
            .parent_resource_id()
            .filter(|p| registry.is_container(p))
            .cloned())
    }

    pub fn add_resource(&mut self, mut resource: Resource) -> Result<()> {
        self.check_loaded()?;
        if self.registry()?.resources.contains_key(resource.id()) {
            return Err(RepositoryError::AlreadyRegistered {
                id: resource.id().clone(),
            });
        }
        resource.header_mut().parent_resource_id = self.resolve_parent(&resource)?;

        self.emit_pre(RepositoryEvent::ResourceAdding(resource.clone()))?;

        if let Some(folder) = self
            .paths
            .resource_folder(resource.resource_type(), resource.id())
        {
            let folder = self.root.join(folder);
            fs::create_dir_all(&folder).map_err(|e| RepositoryError::io(&folder, e))?;
        }
        let id = resource.id().clone();
        self.registry_mut()?
            .resources
            .insert(id.clone(), resource.clone());
        self.dirty = true;
        info!(
            resource_id = %id,
            resource_type = ?resource.resource_type(),
            parent = ?resource.parent_resource_id(),
            "[REPO] Added resource"
        );

        self.emit(RepositoryEvent::ResourceAdded(resource))?;
        self.emit(RepositoryEvent::Changed)
    }

    /// Replaces a registered resource, re-resolving its ancestry. Render
    /// records of the previous version are kept when the new one has none.
    pub fn update_resource(&mut self, mut resource: Resource) -> Result<()> {
        let previous = self.resource(resource.id())?.clone();
        resource.header_mut().parent_resource_id = self.resolve_parent(&resource)?;
        if resource.header().renders.is_empty() {
            resource.header_mut().renders = previous.header().renders.clone();
        }
        self.replace_resource(previous, resource)
    }

    fn replace_resource(&mut self, previous: Resource, current: Resource) -> Result<()> {
        self.emit_pre(RepositoryEvent::ResourceUpdating {
            previous: previous.clone(),
            current: current.clone(),
        })?;
        self.registry_mut()?
            .resources
            .insert(current.id().clone(), current.clone());
        self.dirty = true;
        debug!(resource_id = %current.id(), "[REPO] Updated resource");
        self.emit(RepositoryEvent::ResourceUpdated { previous, current })?;
        self.emit(RepositoryEvent::Changed)
    }

    /// Deletes a resource's renders, folder and graph and deregisters it.
    /// Returns every removed ID, children first when `remove_children` is set.
    ///
    /// Files still cited by another resource move to that resource instead of
    /// being removed or orphaned.
    pub fn remove_resource(&mut self, id: &str, remove_children: bool) -> Result<Vec<ResourceId>> {
        self.check_loaded()?;
        let resource = self.resource(id)?.clone();
        self.emit_pre(RepositoryEvent::ResourceRemoving(resource.clone()))?;

        let mut removed = Vec::new();
        for child in self.child_resource_ids(id)? {
            if !self.registry()?.resources.contains_key(&child) {
                continue;
            }
            if self.hand_over_file(&child, id)? {
                continue;
            }
            if remove_children {
                removed.extend(self.remove_resource(&child, true)?);
            } else {
                let previous = self.resource(&child)?.clone();
                let mut orphan = previous.clone();
                orphan.header_mut().parent_resource_id = None;
                self.replace_resource(previous, orphan)?;
            }
        }

        for render in resource.header().renders.values() {
            store::remove_if_exists(&self.root.join(&render.local_path))?;
        }
        if let Some(folder) = self
            .paths
            .resource_folder(resource.resource_type(), resource.id())
        {
            let folder = self.root.join(folder);
            match fs::remove_dir_all(&folder) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RepositoryError::io(&folder, e)),
            }
        }
        self.store.delete_graph(id)?;
        self.registry_mut()?.resources.remove(id);
        self.dirty = true;
        info!(resource_id = %id, "[REPO] Removed resource");

        self.emit(RepositoryEvent::ResourceRemoved(resource))?;
        self.emit(RepositoryEvent::Changed)?;
        removed.push(id.to_string());
        Ok(removed)
    }

    /// Records that `holder` cites the file `file_id`.
    pub fn add_file_reference(&mut self, file_id: &str, holder: &str) -> Result<()> {
        let previous = self.resource(file_id)?.clone();
        let Resource::File(file) = &previous else {
            return Ok(());
        };
        if file.referenced_by.contains(holder) {
            return Ok(());
        }
        let mut current = previous.clone();
        if let Resource::File(file) = &mut current {
            file.referenced_by.insert(holder.to_string());
        }
        self.replace_resource(previous, current)
    }

    /// Drops `holder`'s citation of the file `file_id`. When `holder` owns
    /// the file it moves to another citing resource, or is removed when none
    /// is left. Returns the removed IDs.
    pub fn release_file(&mut self, file_id: &str, holder: &str) -> Result<Vec<ResourceId>> {
        if self.hand_over_file(file_id, holder)? {
            return Ok(Vec::new());
        }
        let owned = self.resource(file_id)?.parent_resource_id().map(String::as_str) == Some(holder);
        if owned {
            return self.remove_resource(file_id, true);
        }
        let previous = self.resource(file_id)?.clone();
        let mut current = previous.clone();
        if let Resource::File(file) = &mut current {
            if !file.referenced_by.remove(holder) {
                return Ok(Vec::new());
            }
        }
        self.replace_resource(previous, current)?;
        Ok(Vec::new())
    }

    /// Moves a file owned by `leaving` to another registered resource that
    /// still cites it. Returns false when `id` is not such a file.
    fn hand_over_file(&mut self, id: &str, leaving: &str) -> Result<bool> {
        let previous = self.resource(id)?.clone();
        let Resource::File(file) = &previous else {
            return Ok(false);
        };
        if file.header.parent_resource_id.as_deref() != Some(leaving) {
            return Ok(false);
        }
        let registry = self.registry()?;
        let Some(next) = file
            .referenced_by
            .iter()
            .find(|h| h.as_str() != leaving && registry.is_container(h))
            .cloned()
        else {
            return Ok(false);
        };
        let mut current = previous.clone();
        if let Resource::File(file) = &mut current {
            file.referenced_by.remove(leaving);
            file.header.parent_resource_id = Some(next.clone());
        }
        info!(resource_id = %id, from = %leaving, to = %next, "[REPO] Handed shared file over");
        self.replace_resource(previous, current)?;
        Ok(true)
    }

    pub fn calculate_render_slug(
        &self,
        resource: &Resource,
        kind: RenderKind,
        local_path: &Path,
    ) -> String {
        self.paths
            .calculate_render_slug(resource.resource_type(), resource.id(), kind, local_path)
    }

    /// Publishes a render of `id` from `temp_file`.
    ///
    /// An existing render of the same kind keeps its path, so URLs stay stable
    /// across re-renders; otherwise a free path is resolved.
    pub fn import_resource_render(
        &mut self,
        id: &str,
        kind: RenderKind,
        temp_file: &Path,
    ) -> Result<RenderEntry> {
        let previous = self.resource(id)?.clone();
        let local_path = match previous.render(kind) {
            Some(existing) => {
                store::remove_if_exists(&self.root.join(&existing.local_path))?;
                existing.local_path.clone()
            }
            None => self.paths.resolve_free_render_path(&previous, kind),
        };
        store::copy_atomic(temp_file, &self.root.join(&local_path))?;
        let entry = self.record_render(previous, kind, local_path)?;
        debug!(resource_id = %id, ?kind, slug = %entry.slug, "[REPO] Imported render");
        Ok(entry)
    }

    /// Registers an empty render so that links to `id` resolve before its
    /// real render exists. An existing render is returned untouched.
    pub fn register_placeholder_render(&mut self, id: &str, kind: RenderKind) -> Result<RenderEntry> {
        let previous = self.resource(id)?.clone();
        if let Some(existing) = previous.render(kind) {
            return Ok(existing.clone());
        }
        let local_path = self.paths.resolve_free_render_path(&previous, kind);
        store::write_bytes_atomic(&self.root.join(&local_path), b"")?;
        self.record_render(previous, kind, local_path)
    }

    fn record_render(
        &mut self,
        previous: Resource,
        kind: RenderKind,
        local_path: PathBuf,
    ) -> Result<RenderEntry> {
        let slug = self.calculate_render_slug(&previous, kind, &local_path);
        let entry = RenderEntry { local_path, slug };
        let mut current = previous.clone();
        current.header_mut().renders.insert(kind, entry.clone());
        self.replace_resource(previous, current)?;
        Ok(entry)
    }

    pub fn cms_render_path(&self, item: &CmsItem) -> PathBuf {
        self.paths.site_dir().join(&item.render_file_name)
    }

    /// Publishes the render of a CMS item and clears its dirty flag.
    pub fn import_cms_render(&mut self, slug: &str, temp_file: &Path) -> Result<PathBuf> {
        let item = self
            .registry()?
            .cms_items
            .get(slug)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(EntityKind::CmsItem, slug))?;
        let dest = self.cms_render_path(&item);
        self.emit(RepositoryEvent::Changing)?;
        store::copy_atomic(temp_file, &dest)?;
        if let Some(stored) = self.registry_mut()?.cms_items.get_mut(slug) {
            stored.dirty = false;
        }
        self.dirty = true;
        self.emit(RepositoryEvent::Changed)?;
        Ok(dest)
    }

    /// Loads the stored graph of `id` and every object it references.
    pub fn load_content(&self, id: &str) -> Result<(ObjectGraph, ObjectMap)> {
        let graph = self.store.get_graph(id)?;
        let mut objects = ObjectMap::new();
        for object_id in graph.object_ids() {
            let object = self.store.get_object(object_id)?;
            objects.insert(object_id.clone(), object);
        }
        Ok((graph, objects))
    }

    pub fn count_of(&self, resource_type: ResourceType) -> Result<usize> {
        Ok(self.registry()?.count_of(resource_type))
    }
}
