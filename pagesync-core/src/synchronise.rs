//! Sync orchestrator: mirrors one remote node and everything below it.
//!
//! [`Synchroniser::sync`] walks the remote tree from a given page or database:
//! - each node is checked for staleness ([`is_stale`]) before its children are
//!   fetched; stale nodes are re-fetched, hydrated and persisted, fresh nodes
//!   reload their stored graph to discover children;
//! - local children no longer reachable from the node are removed;
//! - children are synced recursively, and a node whose children changed is
//!   re-rendered even when it is itself unchanged;
//! - the outermost call then renders every touched resource, followed by every
//!   CMS item that is dirty or embeds a touched resource.
//!
//! The whole run executes inside one repository update scope, so the registry
//! is written once, on success or failure.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::collections::HashSet;
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cms::{default_summary, CmsProperties};
use crate::config::{DownloadOptions, SyncSettings};
use crate::contract::{
    escape_html, FetchedContent, LinkMap, RemoteHeader, RemoteSource, Renderer, SourceError,
};
use crate::download::{collect_file_requests, file_resource_id, should_download, FileRequest};
use crate::error::{RepositoryError, SyncError};
use crate::model::{EditableResource, RenderKind, Resource, ResourceId};
use crate::objects::{normalize_id, ObjectGraph, ObjectKind, ObjectMap, ParentRef, RawObject};
use crate::repository::Repository;

/// One page, row, file or item that failed in a fault-tolerant run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncFailure {
    pub id: String,
    pub message: String,
}

/// Outcome of a sync call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Resources re-fetched from the remote.
    pub updated: Vec<ResourceId>,
    /// Resources deregistered because the remote no longer has them.
    pub removed: Vec<ResourceId>,
    pub rendered: Vec<ResourceId>,
    /// Slugs of re-rendered CMS items.
    pub cms_rendered: Vec<String>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn updated_count(&self) -> usize {
        self.updated.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Decides whether a node must be re-fetched.
///
/// A node is stale when it is not mirrored yet, when its recorded edit time
/// differs from the remote one, when a refresh is forced, or when it was last
/// synced within `threshold` of its last edit (the remote may not have
/// settled yet).
pub fn is_stale(
    existing: Option<&EditableResource>,
    remote_edited: Option<DateTime<Utc>>,
    force: bool,
    threshold: chrono::Duration,
) -> bool {
    let Some(existing) = existing else {
        return true;
    };
    if force || existing.last_edited_on != remote_edited {
        return true;
    }
    match (existing.last_synced_on, existing.last_edited_on) {
        (Some(synced), Some(edited)) => {
            (synced - edited).num_milliseconds().abs() < threshold.num_milliseconds()
        }
        _ => false,
    }
}

fn remote_error(id: &str, e: SourceError) -> SyncError {
    SyncError::Remote {
        id: id.to_string(),
        message: e.to_string(),
    }
}

fn parent_hint(parent: &ParentRef) -> Option<ResourceId> {
    match parent {
        ParentRef::Page(id) | ParentRef::Database(id) | ParentRef::Workspace(id) => {
            Some(id.clone())
        }
        ParentRef::Block(_) => None,
    }
}

/// State accumulated across the recursive walk of one sync call.
struct SyncRun {
    options: DownloadOptions,
    cancel: CancellationToken,
    visited: HashSet<ResourceId>,
    /// Render set, in the order resources finished syncing.
    touched: Vec<ResourceId>,
    report: SyncReport,
}

impl SyncRun {
    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    fn mark_touched(&mut self, id: &str) {
        if !self.touched.iter().any(|t| t == id) {
            self.touched.push(id.to_string());
        }
    }

    /// Records a non-fatal failure when the run tolerates it, otherwise
    /// hands the error back.
    fn tolerate(&mut self, id: &str, e: SyncError) -> Result<(), SyncError> {
        if !self.options.fault_tolerant || e.is_fatal() {
            return Err(e);
        }
        warn!(id, error = %e, "[SYNC] Skipping failed item");
        self.report.failures.push(SyncFailure {
            id: id.to_string(),
            message: e.to_string(),
        });
        Ok(())
    }
}

pub struct Synchroniser<S, R> {
    source: S,
    renderer: R,
    settings: SyncSettings,
}

impl<S, R> Synchroniser<S, R>
where
    S: RemoteSource,
    R: Renderer,
{
    pub fn new(source: S, renderer: R, settings: SyncSettings) -> Self {
        Self {
            source,
            renderer,
            settings,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Synchronises the remote node `id` and its descendants into `repo`.
    pub async fn sync(
        &self,
        repo: &mut Repository,
        id: &str,
        options: &DownloadOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let id = normalize_id(id);
        repo.begin_update()?;
        info!(
            resource_id = %id,
            force = options.force_refresh,
            fault_tolerant = options.fault_tolerant,
            render = options.render,
            "[SYNC] Starting synchronisation"
        );

        let mut run = SyncRun {
            options: options.clone(),
            cancel: cancel.clone(),
            visited: HashSet::new(),
            touched: Vec::new(),
            report: SyncReport::default(),
        };

        let mut result = self.sync_node(repo, id.clone(), None, &mut run).await;
        if result.is_ok() && options.render {
            result = self.render_pass(repo, &mut run).map(|()| true);
        }

        // Completed work is persisted even when the run failed.
        let saved = repo.end_update();
        match (result, saved) {
            (Err(e), saved) => {
                if let Err(save_error) = saved {
                    error!(error = %save_error, "[SYNC][ERROR] Failed to persist registry after error");
                }
                error!(resource_id = %id, error = %e, "[SYNC][ERROR] Synchronisation failed");
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e.into()),
            (Ok(_), Ok(written)) => {
                info!(
                    resource_id = %id,
                    updated = run.report.updated.len(),
                    removed = run.report.removed.len(),
                    rendered = run.report.rendered.len(),
                    cms_rendered = run.report.cms_rendered.len(),
                    failures = run.report.failures.len(),
                    registry_written = written,
                    "[SYNC] Synchronisation complete"
                );
                Ok(run.report)
            }
        }
    }

    /// Syncs one node and recurses into its children. Returns whether the
    /// node joined the render set.
    fn sync_node<'a>(
        &'a self,
        repo: &'a mut Repository,
        id: ResourceId,
        hint: Option<RemoteHeader>,
        run: &'a mut SyncRun,
    ) -> BoxFuture<'a, Result<bool, SyncError>> {
        async move {
            run.check_cancelled()?;
            if !run.visited.insert(id.clone()) {
                debug!(resource_id = %id, "[SYNC] Already visited in this run");
                return Ok(false);
            }

            let header = match hint {
                Some(h) if h.last_edited_time.is_some() => h,
                _ => self
                    .source
                    .fetch_header(&id)
                    .await
                    .map_err(|e| remote_error(&id, e))?,
            };
            if !matches!(header.kind, ObjectKind::Page | ObjectKind::Database) {
                return Err(SyncError::Remote {
                    id,
                    message: format!("unsupported node kind {:?}", header.kind),
                });
            }

            let existing = repo.find_resource(&id)?.cloned();
            let previous_children = match existing {
                Some(_) => repo.child_resource_ids(&id)?,
                None => Vec::new(),
            };
            let stale = is_stale(
                existing.as_ref().and_then(Resource::editable),
                header.last_edited_time,
                run.options.force_refresh,
                self.settings.premature_sync_threshold(),
            ) || !repo.store().contains_graph(&id);

            let mut touched = false;
            let (mut graph, mut objects) = if stale {
                info!(resource_id = %id, kind = ?header.kind, "[SYNC] Resource is stale, fetching");
                let content = self
                    .source
                    .fetch_full(&id)
                    .await
                    .map_err(|e| remote_error(&id, e))?;
                touched = true;
                self.hydrate(repo, &id, header.kind, content, existing.is_some(), run)
                    .await?
            } else {
                debug!(resource_id = %id, "[SYNC] Resource up to date");
                if !self.has_render(repo, &id, run.options.render_kind)? {
                    touched = true;
                }
                repo.load_content(&id)?
            };

            let mut skipped_rows = HashSet::new();
            if header.kind == ObjectKind::Database {
                skipped_rows = self
                    .hydrate_rows(repo, &id, &mut graph, &mut objects, run)
                    .await?;
            }

            // Edit times of children stored with an unchanged parent may be
            // outdated; those children fetch their own header.
            let fresh = stale || header.kind == ObjectKind::Database;
            let children: Vec<RemoteHeader> = graph
                .child_resources(&objects)
                .into_iter()
                .map(|child| RemoteHeader {
                    id: child.id.clone(),
                    kind: child.kind,
                    last_edited_time: child.last_edited_time.filter(|_| fresh),
                })
                .collect();

            let mut reachable: HashSet<ResourceId> =
                children.iter().map(|c| c.id.clone()).collect();
            reachable.extend(
                self.file_requests(repo, &graph, &objects)
                    .into_iter()
                    .map(|r| r.id),
            );
            for child in previous_children {
                let is_file = match repo.find_resource(&child)? {
                    Some(resource) => matches!(resource, Resource::File(_)),
                    None => continue,
                };
                if reachable.contains(&child) {
                    continue;
                }
                info!(resource_id = %id, child = %child, "[SYNC] Child no longer reachable, removing");
                let removed = if is_file {
                    repo.release_file(&child, &id)?
                } else {
                    repo.remove_resource(&child, true)?
                };
                run.report.removed.extend(removed);
            }
            if stale {
                let released: Vec<ResourceId> = repo
                    .resources()?
                    .filter(|r| match r {
                        Resource::File(file) => {
                            file.referenced_by.contains(&id)
                                && file.header.parent_resource_id.as_ref() != Some(&id)
                        }
                        _ => false,
                    })
                    .map(|r| r.id().clone())
                    .filter(|file_id| !reachable.contains(file_id))
                    .collect();
                for file_id in released {
                    debug!(resource_id = %id, file = %file_id, "[SYNC] File no longer cited");
                    repo.release_file(&file_id, &id)?;
                }
            }

            let mut child_touched = false;
            for child in children {
                run.check_cancelled()?;
                if skipped_rows.contains(&child.id) {
                    continue;
                }
                let child_id = child.id.clone();
                match self.sync_node(repo, child_id.clone(), Some(child), run).await {
                    Ok(t) => child_touched |= t,
                    Err(e) => run.tolerate(&child_id, e)?,
                }
            }
            if child_touched && !touched {
                debug!(resource_id = %id, "[SYNC] Children changed, cascading render");
                touched = true;
            }
            if touched {
                run.mark_touched(&id);
            }
            Ok(touched)
        }
        .boxed()
    }

    /// Persists freshly fetched content and registers or updates the resource.
    async fn hydrate(
        &self,
        repo: &mut Repository,
        id: &ResourceId,
        kind: ObjectKind,
        content: FetchedContent,
        exists: bool,
        run: &mut SyncRun,
    ) -> Result<(ObjectGraph, ObjectMap), SyncError> {
        let FetchedContent {
            mut root,
            objects,
            graph,
        } = content;

        // Row properties fetched by the parent database survive a refetch.
        if let Ok(stored) = repo.store().get_object(id) {
            for (key, value) in stored.properties {
                root.properties.entry(key).or_insert(value);
            }
        }

        repo.store().put_object(&root)?;
        for object in &objects {
            repo.store().put_object(object)?;
        }
        if kind != ObjectKind::Database {
            repo.store().put_graph(&graph)?;
        }

        let mut map: ObjectMap = objects.into_iter().map(|o| (o.id.clone(), o)).collect();
        map.insert(root.id.clone(), root.clone());

        let profile = repo.paths().profile();
        let cms_mode = repo.registry()?.is_cms_mode();
        let file_id = |url: &Option<String>| {
            url.as_deref()
                .filter(|u| should_download(u, &self.settings, profile))
                .map(|u| file_resource_id(u, &self.settings))
        };

        let mut editable = EditableResource::new(id.clone(), root.title.clone().unwrap_or_default());
        editable.header.parent_resource_id = root.parent.as_ref().and_then(parent_hint);
        editable.cover = file_id(&root.cover_url);
        editable.thumbnail = file_id(&root.icon_url);
        editable.created_on = root.created_time;
        editable.last_edited_on = root.last_edited_time;
        editable.last_synced_on = Some(Utc::now());

        if cms_mode && kind == ObjectKind::Page && !root.properties.is_empty() {
            let mut properties = CmsProperties::from_row_properties(&root.properties);
            if properties.summary.is_none() {
                properties.summary = default_summary(&graph, &map);
            }
            editable.keywords = properties.tags.clone();
            editable.cms_properties = Some(properties);
        }

        let resource = match kind {
            ObjectKind::Database => Resource::Database(editable),
            _ => Resource::Page(editable),
        };
        let resource_type = resource.resource_type();
        if exists {
            repo.update_resource(resource)?;
        } else {
            repo.add_resource(resource)?;
        }
        if !profile.nests_by_id(resource_type) {
            repo.register_placeholder_render(id, run.options.render_kind)?;
        }
        run.report.updated.push(id.clone());

        let requests = self.file_requests(repo, &graph, &map);
        self.download_files(repo, id, requests, run).await?;
        Ok((graph, map))
    }

    /// Replaces the children of a database graph with its current rows.
    ///
    /// Properties are fetched only for stale rows, with bounded concurrency,
    /// and recombined in row order before anything is written. Returns the
    /// rows whose properties could not be fetched; they keep their last stored
    /// copy (or stay out of the graph) and are retried on the next run.
    async fn hydrate_rows(
        &self,
        repo: &mut Repository,
        database_id: &ResourceId,
        graph: &mut ObjectGraph,
        objects: &mut ObjectMap,
        run: &mut SyncRun,
    ) -> Result<HashSet<ResourceId>, SyncError> {
        let mut rows: Vec<RawObject> = Vec::new();
        let mut cursor = None;
        loop {
            run.check_cancelled()?;
            let batch = self
                .source
                .enumerate_children(database_id, None, cursor)
                .await
                .map_err(|e| remote_error(database_id, e))?;
            rows.extend(batch.objects);
            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(database_id = %database_id, rows = rows.len(), "[SYNC] Enumerated database rows");

        let threshold = self.settings.premature_sync_threshold();
        let mut changed: Vec<usize> = Vec::new();
        for (index, row) in rows.iter_mut().enumerate() {
            row.id = normalize_id(&row.id);
            let stale = is_stale(
                repo.find_resource(&row.id)?.and_then(Resource::editable),
                row.last_edited_time,
                run.options.force_refresh,
                threshold,
            );
            match repo.store().get_object(&row.id) {
                Ok(stored) if !stale => *row = stored,
                _ => changed.push(index),
            }
        }

        let concurrency = self.settings.property_fetch_concurrency.max(1);
        let fetched: Vec<_> = futures::stream::iter(
            changed
                .iter()
                .copied()
                .map(|index| self.source.fetch_properties(&rows[index].id)),
        )
        .buffered(concurrency)
        .collect()
        .await;

        let mut skipped = HashSet::new();
        for (index, result) in changed.iter().zip(fetched) {
            let row = &mut rows[*index];
            match result {
                Ok(properties) => {
                    row.properties.extend(properties);
                    repo.store().put_object(row)?;
                }
                Err(e) => {
                    run.tolerate(&row.id, remote_error(&row.id, e))?;
                    if let Ok(stored) = repo.store().get_object(&row.id) {
                        *row = stored;
                    }
                    skipped.insert(row.id.clone());
                }
            }
        }
        rows.retain(|row| !skipped.contains(&row.id) || repo.store().contains_object(&row.id));

        let updated = ObjectGraph::with_children(
            database_id.clone(),
            rows.iter().map(|r| ObjectGraph::leaf(r.id.clone())).collect(),
        );
        let unchanged_graph = matches!(repo.store().get_graph(database_id), Ok(g) if g == updated);
        if !unchanged_graph {
            repo.store().put_graph(&updated)?;
        }
        *graph = updated;
        objects.extend(rows.into_iter().map(|r| (r.id.clone(), r)));
        Ok(skipped)
    }

    fn file_requests(
        &self,
        repo: &Repository,
        graph: &ObjectGraph,
        objects: &ObjectMap,
    ) -> Vec<FileRequest> {
        // Files cited inside a child page belong to that child.
        let mut own: Vec<&RawObject> = Vec::new();
        collect_own_objects(graph, objects, true, &mut own);
        collect_file_requests(own, &self.settings, repo.paths().profile())
    }

    /// Downloads every requested file not mirrored yet into a file resource
    /// owned by `parent`.
    async fn download_files(
        &self,
        repo: &mut Repository,
        parent: &ResourceId,
        requests: Vec<FileRequest>,
        run: &mut SyncRun,
    ) -> Result<(), SyncError> {
        for request in requests {
            run.check_cancelled()?;
            if repo.find_resource(&request.id)?.is_some() {
                repo.add_file_reference(&request.id, parent)?;
                continue;
            }
            match self.download_file(repo, parent, &request).await {
                Ok(()) => {
                    info!(resource_id = %request.id, url = %request.url, "[SYNC] Downloaded file");
                }
                Err(e) => run.tolerate(&request.id, e)?,
            }
        }
        Ok(())
    }

    async fn download_file(
        &self,
        repo: &mut Repository,
        parent: &ResourceId,
        request: &FileRequest,
    ) -> Result<(), SyncError> {
        let temp = tempfile::NamedTempFile::new()
            .map_err(|e| RepositoryError::io(std::env::temp_dir(), e))?;
        self.source
            .download_binary(&request.url, temp.path())
            .await
            .map_err(|e| SyncError::Download {
                url: request.url.clone(),
                message: e.to_string(),
            })?;
        repo.add_resource(Resource::File(request.to_resource(parent)))?;
        repo.import_resource_render(&request.id, RenderKind::File, temp.path())?;
        Ok(())
    }

    /// True when a non-empty render of `kind` exists. Placeholders do not count.
    fn has_render(
        &self,
        repo: &Repository,
        id: &str,
        kind: RenderKind,
    ) -> Result<bool, SyncError> {
        let resource = repo.resource(id)?;
        Ok(resource
            .render(kind)
            .and_then(|r| std::fs::metadata(repo.root().join(&r.local_path)).ok())
            .map(|m| m.len() > 0)
            .unwrap_or(false))
    }

    fn render_pass(&self, repo: &mut Repository, run: &mut SyncRun) -> Result<(), SyncError> {
        let kind = run.options.render_kind;
        let touched = run.touched.clone();
        info!(resources = touched.len(), ?kind, "[SYNC] Rendering touched resources");

        for id in &touched {
            run.check_cancelled()?;
            let resource = match repo.find_resource(id)? {
                Some(Resource::File(_)) | None => continue,
                Some(resource) => resource.clone(),
            };
            match self.render_resource(repo, &resource, kind) {
                Ok(()) => run.report.rendered.push(id.clone()),
                Err(e) => {
                    if kind == RenderKind::Html && !e.is_fatal() {
                        self.write_diagnostic(repo, &resource, &e);
                    }
                    run.tolerate(id, e)?;
                }
            }
        }

        if kind != RenderKind::Html || !repo.registry()?.is_cms_mode() {
            return Ok(());
        }
        let slugs: Vec<String> = repo
            .cms_items()?
            .filter(|item| item.dirty || touched.iter().any(|id| item.references(id)))
            .map(|item| item.slug.clone())
            .collect();
        info!(items = slugs.len(), "[SYNC] Rendering CMS items");
        for slug in slugs {
            run.check_cancelled()?;
            match self.render_cms_item(repo, &slug) {
                Ok(()) => run.report.cms_rendered.push(slug),
                Err(e) => run.tolerate(&slug, e)?,
            }
        }
        Ok(())
    }

    fn render_resource(
        &self,
        repo: &mut Repository,
        resource: &Resource,
        kind: RenderKind,
    ) -> Result<(), SyncError> {
        let (graph, objects) = repo.load_content(resource.id())?;
        // Placeholders guarantee a slug for children not rendered yet.
        let links: LinkMap = graph
            .child_resources(&objects)
            .into_iter()
            .filter_map(|child| {
                let target = repo.find_resource(&child.id).ok().flatten()?;
                Some((child.id.clone(), target.render(kind)?.slug.clone()))
            })
            .collect();
        let markup = self
            .renderer
            .render_resource(resource, &graph, &objects, &links, kind)
            .map_err(|e| SyncError::Render {
                id: resource.id().clone(),
                message: e.to_string(),
            })?;
        let temp = write_temp(&markup)?;
        let entry = repo.import_resource_render(resource.id(), kind, temp.path())?;
        debug!(resource_id = %resource.id(), slug = %entry.slug, "[SYNC] Rendered resource");
        Ok(())
    }

    fn render_cms_item(&self, repo: &mut Repository, slug: &str) -> Result<(), SyncError> {
        let registry = repo.registry()?;
        let Some(item) = registry.cms_items.get(slug).cloned() else {
            return Ok(());
        };
        let resolve = |ids: Vec<&ResourceId>| -> Vec<Resource> {
            ids.into_iter()
                .filter_map(|id| registry.resources.get(id).cloned())
                .collect()
        };
        let parts = resolve(item.parts.iter().collect());
        let framing = resolve(item.framing.ids().collect());
        let markup = self
            .renderer
            .render_cms_item(&item, &parts, &framing)
            .map_err(|e| SyncError::Render {
                id: slug.to_string(),
                message: e.to_string(),
            })?;
        let temp = write_temp(&markup)?;
        let path = repo.import_cms_render(slug, temp.path())?;
        debug!(slug, path = %path.display(), "[SYNC] Rendered CMS item");
        Ok(())
    }

    /// Best-effort error page in place of a failed HTML render.
    fn write_diagnostic(&self, repo: &mut Repository, resource: &Resource, e: &SyncError) {
        let markup = format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
             <body><h1>Render failed</h1><p>{title}</p><pre>{error}</pre></body></html>\n",
            title = escape_html(resource.title()),
            error = escape_html(&e.to_string()),
        );
        let written = write_temp(&markup).and_then(|temp| {
            repo.import_resource_render(resource.id(), RenderKind::Html, temp.path())
                .map_err(SyncError::from)
        });
        if let Err(diag) = written {
            warn!(resource_id = %resource.id(), error = %diag, "[SYNC] Could not write diagnostic render");
        }
    }
}

fn write_temp(content: &str) -> Result<tempfile::NamedTempFile, SyncError> {
    let mut temp = tempfile::NamedTempFile::new()
        .map_err(|e| RepositoryError::io(std::env::temp_dir(), e))?;
    if let Err(e) = temp.write_all(content.as_bytes()).and_then(|()| temp.flush()) {
        return Err(RepositoryError::io(temp.path(), e).into());
    }
    Ok(temp)
}

/// Objects of `node`'s subtree that belong to the current resource. Child
/// pages and databases own their subtrees and are skipped.
fn collect_own_objects<'a>(
    node: &'a ObjectGraph,
    objects: &'a ObjectMap,
    is_root: bool,
    out: &mut Vec<&'a RawObject>,
) {
    let Some(object) = objects.get(&node.object_id) else {
        return;
    };
    if !is_root && object.is_resource_root() {
        return;
    }
    out.push(object);
    for child in &node.children {
        collect_own_objects(child, objects, false, out);
    }
}
