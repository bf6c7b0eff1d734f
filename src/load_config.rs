use anyhow::Result;
use pagesync_core::config::SyncSettings;
use pagesync_core::paths::{PathProfile, PathResolver};
use pagesync_core::registry::Registry;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Environment variable holding the remote API token.
pub const API_TOKEN_ENV: &str = "PAGESYNC_API_TOKEN";

#[derive(Deserialize)]
struct StaticConfig {
    repository: RepositorySection,
    remote: RemoteSection,
    #[serde(default)]
    sync: SyncSettings,
}

#[derive(Deserialize)]
struct RepositorySection {
    root: PathBuf,
    #[serde(default = "default_profile")]
    profile: String,
    #[serde(default)]
    cms_database_id: Option<String>,
}

fn default_profile() -> String {
    "offline".to_string()
}

#[derive(Deserialize)]
struct RemoteSection {
    base_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryConfig {
    pub root: PathBuf,
    pub profile: PathProfile,
    pub cms_database_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Taken from the environment; the registry's default key is the fallback.
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub repository: RepositoryConfig,
    pub remote: RemoteConfig,
    pub sync: SyncSettings,
}

/// Loads the static YAML config file (no secrets) and injects the API token
/// from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let profile: PathProfile = match static_conf.repository.profile.parse() {
        Ok(profile) => profile,
        Err(e) => {
            error!(profile = %static_conf.repository.profile, "Unsupported repository.profile in config");
            anyhow::bail!("Unsupported repository.profile: {e}");
        }
    };

    let base_url = static_conf.remote.base_url.trim_end_matches('/').to_string();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        error!(base_url = %base_url, "remote.base_url must be an http(s) URL");
        anyhow::bail!("remote.base_url must be an http(s) URL, got {base_url}");
    }

    let api_token = match std::env::var(API_TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => {
            info!("{API_TOKEN_ENV} found in env");
            Some(token)
        }
        _ => {
            warn!("{API_TOKEN_ENV} not set, falling back to the registry default key");
            None
        }
    };

    static_conf.sync.trace_loaded();
    info!(
        root = %static_conf.repository.root.display(),
        ?profile,
        base_url = %base_url,
        "Config loaded and merged successfully"
    );

    Ok(AppConfig {
        repository: RepositoryConfig {
            root: static_conf.repository.root,
            profile,
            cms_database_id: static_conf.repository.cms_database_id,
        },
        remote: RemoteConfig {
            base_url,
            api_token,
        },
        sync: static_conf.sync,
    })
}

/// Reads the log level persisted in the registry of the configured
/// repository, without emitting any events. Used before tracing is set up.
pub fn persisted_log_level<P: AsRef<Path>>(config_path: P) -> Option<String> {
    let content = fs::read_to_string(config_path).ok()?;
    let static_conf: StaticConfig = serde_yaml::from_str(&content).ok()?;
    let paths = PathResolver::new(static_conf.repository.root, PathProfile::default());
    let registry = fs::read(paths.registry_path()).ok()?;
    let registry: Registry = serde_json::from_slice(&registry).ok()?;
    Some(registry.log_level)
}
