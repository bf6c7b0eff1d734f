use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::RenderKind;

fn default_premature_sync_threshold_secs() -> u64 {
    60
}

fn default_property_fetch_concurrency() -> usize {
    4
}

fn default_video_hosts() -> Vec<String> {
    ["youtube.com", "youtu.be", "vimeo.com"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Environment-tuned knobs of the sync orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// A resource synced less than this many seconds after its last remote
    /// edit is re-fetched on the next sync even if timestamps match.
    #[serde(default = "default_premature_sync_threshold_secs")]
    pub premature_sync_threshold_secs: u64,
    /// Download files hosted outside the remote for every profile.
    #[serde(default)]
    pub download_external_files: bool,
    /// Hosts serving files uploaded to the remote itself.
    #[serde(default)]
    pub hosted_file_hosts: Vec<String>,
    /// Embeds from these hosts stay links.
    #[serde(default = "default_video_hosts")]
    pub video_hosts: Vec<String>,
    #[serde(default = "default_property_fetch_concurrency")]
    pub property_fetch_concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            premature_sync_threshold_secs: default_premature_sync_threshold_secs(),
            download_external_files: false,
            hosted_file_hosts: Vec::new(),
            video_hosts: default_video_hosts(),
            property_fetch_concurrency: default_property_fetch_concurrency(),
        }
    }
}

impl SyncSettings {
    pub fn premature_sync_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.premature_sync_threshold_secs as i64)
    }

    pub fn trace_loaded(&self) {
        info!(
            premature_sync_threshold_secs = self.premature_sync_threshold_secs,
            download_external_files = self.download_external_files,
            hosted_file_hosts = self.hosted_file_hosts.len(),
            property_fetch_concurrency = self.property_fetch_concurrency,
            "Loaded SyncSettings"
        );
        debug!(?self, "SyncSettings loaded (full debug)");
    }
}

/// Per-call options of [`crate::synchronise::Synchroniser::sync`].
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    /// Run the render pass after fetching.
    pub render: bool,
    pub render_kind: RenderKind,
    /// Treat every visited resource as stale.
    pub force_refresh: bool,
    /// Log and skip failures of a single page, row or file.
    pub fault_tolerant: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            render: true,
            render_kind: RenderKind::Html,
            force_refresh: false,
            fault_tolerant: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings: SyncSettings =
            serde_json::from_str(r#"{"hosted_file_hosts": ["files.example.com"]}"#).unwrap();
        assert_eq!(settings.premature_sync_threshold_secs, 60);
        assert_eq!(settings.property_fetch_concurrency, 4);
        assert!(settings.video_hosts.iter().any(|h| h == "vimeo.com"));
        assert_eq!(settings.premature_sync_threshold(), chrono::Duration::seconds(60));
    }
}
