//! Path resolution: where resources, renders, objects and graphs live on disk.
//!
//! Every location is derived from the repository root, the active
//! [`PathProfile`], and the resource identity. The profile decides two things:
//! whether renders are grouped into per-type folders (`pages/`, `files/`, ...),
//! and which resource types get an object-ID sub-folder of their own.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::model::{RenderKind, Resource, ResourceType};

/// Hidden folder holding the registry, objects and graphs.
pub const METADATA_DIR: &str = ".pagesync";
pub const REGISTRY_FILE: &str = "registry.json";
pub const SITE_DIR: &str = "site";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathProfile {
    /// Everything nested by type and object ID; nothing ever collides.
    Backup,
    /// Browsable offline copy: type folders, only files nested by ID.
    #[default]
    Offline,
    /// Flat, human-readable URLs; files nested by ID.
    Publishing,
    /// Clean URLs for a web host: pages and files nested by ID.
    WebHosting,
}

impl PathProfile {
    pub fn uses_type_folders(&self) -> bool {
        matches!(self, PathProfile::Backup | PathProfile::Offline)
    }

    pub fn nests_by_id(&self, resource_type: ResourceType) -> bool {
        match self {
            PathProfile::Backup => true,
            PathProfile::Offline | PathProfile::Publishing => resource_type == ResourceType::File,
            PathProfile::WebHosting => {
                matches!(resource_type, ResourceType::File | ResourceType::Page)
            }
        }
    }

    /// Whether external (non-source) file URLs are downloaded regardless of settings.
    pub fn forces_external_download(&self) -> bool {
        matches!(self, PathProfile::Backup | PathProfile::WebHosting)
    }
}

impl std::str::FromStr for PathProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "backup" => Ok(PathProfile::Backup),
            "offline" => Ok(PathProfile::Offline),
            "publishing" => Ok(PathProfile::Publishing),
            "webhosting" | "web_hosting" | "web-hosting" => Ok(PathProfile::WebHosting),
            other => Err(format!("unknown path profile: {other}")),
        }
    }
}

/// Maps an ID to a file stem. Reversible via [`file_stem_to_id`].
pub fn id_to_file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

pub fn file_stem_to_id(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Lower-case, dash-separated form of a title, safe for file names and URLs.
pub fn slugify(text: &str) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    let re = NON_WORD.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));
    let lowered = text.to_lowercase();
    re.replace_all(&lowered, "-").trim_matches('-').to_string()
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    profile: PathProfile,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>, profile: PathProfile) -> Self {
        Self {
            root: root.into(),
            profile,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile(&self) -> PathProfile {
        self.profile
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.metadata_dir().join(REGISTRY_FILE)
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.metadata_dir().join("objects")
    }

    pub fn graphs_dir(&self) -> PathBuf {
        self.metadata_dir().join("graphs")
    }

    pub fn site_dir(&self) -> PathBuf {
        self.root.join(SITE_DIR)
    }

    /// Folder (relative to root) that holds renders of this resource type.
    pub fn type_folder(&self, resource_type: ResourceType) -> PathBuf {
        if self.profile.uses_type_folders() {
            PathBuf::from(resource_type.folder_name())
        } else {
            PathBuf::new()
        }
    }

    /// The resource's own folder (relative to root), only when the profile
    /// nests this resource type by object ID.
    pub fn resource_folder(&self, resource_type: ResourceType, id: &str) -> Option<PathBuf> {
        self.profile
            .nests_by_id(resource_type)
            .then(|| self.type_folder(resource_type).join(id_to_file_stem(id)))
    }

    /// Folder (relative to root) a new render of this resource is placed in.
    pub fn render_folder(&self, resource: &Resource) -> PathBuf {
        let resource_type = resource.resource_type();
        self.resource_folder(resource_type, resource.id())
            .unwrap_or_else(|| self.type_folder(resource_type))
    }

    /// Preferred file name of a render, before conflict resolution.
    pub fn render_file_name(&self, resource: &Resource, kind: RenderKind) -> String {
        if let Resource::File(file) = resource {
            return file.file_name.clone();
        }
        let stem = match slugify(resource.title()) {
            s if s.is_empty() => id_to_file_stem(resource.id()),
            s => s,
        };
        match kind.extension() {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem,
        }
    }

    /// A relative render path that no existing file occupies.
    pub fn resolve_free_render_path(&self, resource: &Resource, kind: RenderKind) -> PathBuf {
        let folder = self.render_folder(resource);
        let name = self.render_file_name(resource, kind);
        let candidate = folder.join(&name);
        if !self.root.join(&candidate).exists() {
            return candidate;
        }
        let (stem, ext) = split_extension(&name);
        (2..)
            .map(|n| match ext {
                Some(ext) => folder.join(format!("{stem}-{n}.{ext}")),
                None => folder.join(format!("{stem}-{n}")),
            })
            .find(|p| !self.root.join(p).exists())
            .unwrap_or(candidate)
    }

    /// Public URL path of a render file.
    ///
    /// Built from the type folder segment (if the profile uses one), the
    /// object-ID segment (if the profile nests by ID), and the lower-cased file
    /// name, with the extension stripped for HTML and PDF renders.
    pub fn calculate_render_slug(
        &self,
        resource_type: ResourceType,
        id: &str,
        kind: RenderKind,
        local_path: &Path,
    ) -> String {
        let mut segments: Vec<String> = Vec::new();
        if self.profile.uses_type_folders() {
            segments.push(resource_type.folder_name().to_string());
        }
        if self.profile.nests_by_id(resource_type) {
            segments.push(id_to_file_stem(id).to_lowercase());
        }
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let file_name = match kind {
            RenderKind::Html | RenderKind::Pdf => split_extension(&file_name).0.to_string(),
            RenderKind::File => file_name,
        };
        segments.push(file_name);
        format!("/{}", segments.join("/"))
    }

    pub fn object_path(&self, id: &str) -> PathBuf {
        self.objects_dir()
            .join(format!("{}.json", id_to_file_stem(id)))
    }

    pub fn graph_path(&self, id: &str) -> PathBuf {
        self.graphs_dir().join(format!("{}.json", id_to_file_stem(id)))
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EditableResource, FileResource, ResourceHeader};

    #[test]
    fn id_file_stem_mapping_is_reversible() {
        for id in ["abc-123", "weird/id:with spaces", "ünïcode", "a%b"] {
            let stem = id_to_file_stem(id);
            assert!(stem
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'%'));
            assert_eq!(file_stem_to_id(&stem).as_deref(), Some(id));
        }
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("  Getting Started: Setup!  "), "getting-started-setup");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn render_slug_follows_profile_segments() {
        let offline = PathResolver::new("/tmp/r", PathProfile::Offline);
        let slug = offline.calculate_render_slug(
            ResourceType::Page,
            "P1",
            RenderKind::Html,
            Path::new("pages/My-Page.html"),
        );
        assert_eq!(slug, "/pages/my-page");

        let backup = PathResolver::new("/tmp/r", PathProfile::Backup);
        let slug = backup.calculate_render_slug(
            ResourceType::File,
            "F1",
            RenderKind::File,
            Path::new("files/F1/Photo.PNG"),
        );
        assert_eq!(slug, "/files/f1/photo.png");

        let publishing = PathResolver::new("/tmp/r", PathProfile::Publishing);
        let slug = publishing.calculate_render_slug(
            ResourceType::Page,
            "P1",
            RenderKind::Pdf,
            Path::new("setup.pdf"),
        );
        assert_eq!(slug, "/setup");
    }

    #[test]
    fn free_render_path_skips_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path(), PathProfile::Offline);
        let page = Resource::Page(EditableResource::new("p1", "Setup"));

        let first = resolver.resolve_free_render_path(&page, RenderKind::Html);
        assert_eq!(first, PathBuf::from("pages/setup.html"));
        std::fs::create_dir_all(dir.path().join("pages")).unwrap();
        std::fs::write(dir.path().join(&first), "x").unwrap();

        let second = resolver.resolve_free_render_path(&page, RenderKind::Html);
        assert_eq!(second, PathBuf::from("pages/setup-2.html"));
    }

    #[test]
    fn files_nest_by_id_and_keep_their_name() {
        let resolver = PathResolver::new("/tmp/r", PathProfile::Publishing);
        let file = Resource::File(FileResource {
            header: ResourceHeader::new("f1", "photo.png"),
            source_url: "https://example.com/photo.png".into(),
            file_name: "photo.png".into(),
            referenced_by: Default::default(),
        });
        assert_eq!(
            resolver.resolve_free_render_path(&file, RenderKind::File),
            PathBuf::from("f1/photo.png")
        );
        assert_eq!(resolver.resource_folder(ResourceType::Page, "p1"), None);
    }
}
