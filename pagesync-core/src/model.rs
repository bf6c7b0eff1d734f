//! Resources: the typed, locally mirrored units of remote content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::cms::CmsProperties;
use crate::objects::ObjectId;

/// Identifier of a registered resource. Page, database and workspace
/// resources share the ID of their root object.
pub type ResourceId = ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    File,
    Page,
    Database,
    Workspace,
}

impl ResourceType {
    /// Folder segment used by profiles that group resources by type.
    pub fn folder_name(&self) -> &'static str {
        match self {
            ResourceType::File => "files",
            ResourceType::Page => "pages",
            ResourceType::Database => "databases",
            ResourceType::Workspace => "workspaces",
        }
    }

    /// Resources that may appear as a `parent_resource_id`.
    pub fn is_container(&self) -> bool {
        !matches!(self, ResourceType::File)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    Html,
    Pdf,
    File,
}

impl RenderKind {
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            RenderKind::Html => Some("html"),
            RenderKind::Pdf => Some("pdf"),
            RenderKind::File => None,
        }
    }
}

/// One published output of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderEntry {
    /// Path relative to the repository root.
    pub local_path: PathBuf,
    pub slug: String,
}

/// Fields shared by every resource variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHeader {
    pub id: ResourceId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_resource_id: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub renders: BTreeMap<RenderKind, RenderEntry>,
}

impl ResourceHeader {
    pub fn new(id: impl Into<ResourceId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            parent_resource_id: None,
            renders: BTreeMap::new(),
        }
    }
}

/// Pages and databases: resources whose content is edited remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditableResource {
    #[serde(flatten)]
    pub header: ResourceHeader,
    /// Resource ID of the downloaded cover file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<ResourceId>,
    /// Resource ID of the downloaded icon/thumbnail file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cms_properties: Option<CmsProperties>,
}

impl EditableResource {
    pub fn new(id: impl Into<ResourceId>, title: impl Into<String>) -> Self {
        Self {
            header: ResourceHeader::new(id, title),
            cover: None,
            thumbnail: None,
            created_on: None,
            last_edited_on: None,
            last_synced_on: None,
            keywords: Vec::new(),
            cms_properties: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResource {
    #[serde(flatten)]
    pub header: ResourceHeader,
    pub source_url: String,
    pub file_name: String,
    /// Resources citing this file. The parent is one of them.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub referenced_by: BTreeSet<ResourceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceResource {
    #[serde(flatten)]
    pub header: ResourceHeader,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    File(FileResource),
    Page(EditableResource),
    Database(EditableResource),
    Workspace(WorkspaceResource),
}

impl Resource {
    pub fn header(&self) -> &ResourceHeader {
        match self {
            Resource::File(f) => &f.header,
            Resource::Page(p) | Resource::Database(p) => &p.header,
            Resource::Workspace(w) => &w.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut ResourceHeader {
        match self {
            Resource::File(f) => &mut f.header,
            Resource::Page(p) | Resource::Database(p) => &mut p.header,
            Resource::Workspace(w) => &mut w.header,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.header().id
    }

    pub fn title(&self) -> &str {
        &self.header().title
    }

    pub fn parent_resource_id(&self) -> Option<&ResourceId> {
        self.header().parent_resource_id.as_ref()
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            Resource::File(_) => ResourceType::File,
            Resource::Page(_) => ResourceType::Page,
            Resource::Database(_) => ResourceType::Database,
            Resource::Workspace(_) => ResourceType::Workspace,
        }
    }

    pub fn editable(&self) -> Option<&EditableResource> {
        match self {
            Resource::Page(p) | Resource::Database(p) => Some(p),
            Resource::File(_) | Resource::Workspace(_) => None,
        }
    }

    pub fn editable_mut(&mut self) -> Option<&mut EditableResource> {
        match self {
            Resource::Page(p) | Resource::Database(p) => Some(p),
            Resource::File(_) | Resource::Workspace(_) => None,
        }
    }

    pub fn cms_properties(&self) -> Option<&CmsProperties> {
        match self {
            Resource::Page(p) => p.cms_properties.as_ref(),
            _ => None,
        }
    }

    pub fn render(&self, kind: RenderKind) -> Option<&RenderEntry> {
        self.header().renders.get(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_serializes_with_type_tag_and_flat_header() {
        let mut page = EditableResource::new("p1", "Setup");
        page.header.parent_resource_id = Some("db".into());
        page.keywords = vec!["install".into()];
        let resource = Resource::Page(page);

        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["type"], "page");
        assert_eq!(json["id"], "p1");
        assert_eq!(json["parent_resource_id"], "db");

        let back: Resource = serde_json::from_value(json).unwrap();
        assert_eq!(back, resource);
        assert_eq!(back.resource_type(), ResourceType::Page);
    }

    #[test]
    fn files_are_not_containers() {
        assert!(!ResourceType::File.is_container());
        assert!(ResourceType::Workspace.is_container());
    }
}
