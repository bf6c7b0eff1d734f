//! The registry: root persisted document of a repository.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cms::CmsItem;
use crate::model::{Resource, ResourceId, ResourceType};
use crate::paths::PathProfile;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionControlSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WebServerReloadSettings {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StaticHostSettings {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

/// Settings consumed by integrations outside the core.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntegrationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_control: Option<VersionControlSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_server_reload: Option<WebServerReloadSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_host: Option<StaticHostSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_api_key: Option<String>,
    #[serde(default)]
    pub default_themes: Vec<String>,
    #[serde(default)]
    pub path_profile: PathProfile,
    /// Presence switches the repository into CMS mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cms_database_id: Option<ResourceId>,
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, Resource>,
    /// CMS items keyed by slug.
    #[serde(default)]
    pub cms_items: BTreeMap<String, CmsItem>,
    #[serde(default)]
    pub integrations: IntegrationSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            default_api_key: None,
            default_themes: Vec::new(),
            path_profile: PathProfile::default(),
            cms_database_id: None,
            resources: BTreeMap::new(),
            cms_items: BTreeMap::new(),
            integrations: IntegrationSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Registry {
    pub fn is_cms_mode(&self) -> bool {
        self.cms_database_id.is_some()
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Resources whose resolved parent is `id`, in ID order.
    pub fn children_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resources
            .values()
            .filter(move |r| r.parent_resource_id().map(String::as_str) == Some(id))
    }

    pub fn is_container(&self, id: &str) -> bool {
        self.resources
            .get(id)
            .map(|r| r.resource_type().is_container())
            .unwrap_or(false)
    }

    pub fn count_of(&self, resource_type: ResourceType) -> usize {
        self.resources
            .values()
            .filter(|r| r.resource_type() == resource_type)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let registry: Registry = serde_json::from_str(r#"{"schema_version": 1}"#).unwrap();
        assert_eq!(registry, Registry::default());
        assert!(!registry.is_cms_mode());
    }
}
