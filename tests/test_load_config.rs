use pagesync_core::paths::PathProfile;
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

use pagesync::load_config::{load_config, persisted_log_level, API_TOKEN_ENV};

fn config_file(yaml: &str) -> NamedTempFile {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), yaml).unwrap();
    config_file
}

/// A static config plus the token env var produces a complete AppConfig.
#[tokio::test]
#[serial]
async fn test_load_config_success_injects_env_token() {
    let config_file = config_file(
        r#"
repository:
  root: ./tmp/mirror
  profile: publishing
  cms_database_id: site-db
remote:
  base_url: https://api.example.com/v1/
sync:
  premature_sync_threshold_secs: 30
  hosted_file_hosts: [files.example.com]
"#,
    );
    env::set_var(API_TOKEN_ENV, "top-secret-test-token");

    let config = load_config(config_file.path()).expect("Config should load");

    assert_eq!(config.repository.root, PathBuf::from("./tmp/mirror"));
    assert_eq!(config.repository.profile, PathProfile::Publishing);
    assert_eq!(config.repository.cms_database_id.as_deref(), Some("site-db"));
    assert_eq!(config.remote.base_url, "https://api.example.com/v1");
    assert_eq!(config.remote.api_token.as_deref(), Some("top-secret-test-token"));
    assert_eq!(config.sync.premature_sync_threshold_secs, 30);
    assert_eq!(config.sync.hosted_file_hosts, vec!["files.example.com"]);
    // Unset keys keep their defaults.
    assert_eq!(config.sync.property_fetch_concurrency, 4);
    assert!(config.sync.video_hosts.iter().any(|h| h == "youtube.com"));

    env::remove_var(API_TOKEN_ENV);
}

/// Without the env var the token is left for the registry fallback.
#[tokio::test]
#[serial]
async fn test_load_config_defaults_without_token_or_sync_section() {
    let config_file = config_file(
        r#"
repository:
  root: ./mirror
remote:
  base_url: http://localhost:8080
"#,
    );
    env::remove_var(API_TOKEN_ENV);

    let config = load_config(config_file.path()).expect("Config should load");

    assert_eq!(config.repository.profile, PathProfile::Offline);
    assert!(config.repository.cms_database_id.is_none());
    assert!(config.remote.api_token.is_none());
    assert_eq!(config.sync.premature_sync_threshold_secs, 60);
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_for_invalid_file() {
    let config_file = config_file("not-yaml: [:::");

    let err = load_config(config_file.path()).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

#[tokio::test]
#[serial]
async fn test_load_config_rejects_unknown_profile_and_bad_url() {
    let bad_profile = config_file(
        r#"
repository:
  root: ./mirror
  profile: archive
remote:
  base_url: https://api.example.com
"#,
    );
    let msg = load_config(bad_profile.path()).unwrap_err().to_string();
    assert!(msg.contains("profile"), "Profile error expected, got: {msg}");

    let bad_url = config_file(
        r#"
repository:
  root: ./mirror
remote:
  base_url: ftp://api.example.com
"#,
    );
    let msg = load_config(bad_url.path()).unwrap_err().to_string();
    assert!(msg.contains("base_url"), "URL error expected, got: {msg}");
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_for_missing_file() {
    let err = load_config("/definitely/not/here.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn persisted_log_level_reads_the_registry() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("mirror");
    let config_file = config_file(&format!(
        "repository:\n  root: {}\nremote:\n  base_url: https://api.example.com\n",
        root.display()
    ));
    assert_eq!(persisted_log_level(config_file.path()), None);

    pagesync_core::Repository::init(&root, PathProfile::Offline, None).unwrap();
    assert_eq!(persisted_log_level(config_file.path()).as_deref(), Some("info"));
}
