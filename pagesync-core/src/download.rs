//! Binary file selection and content addressing.
//!
//! A page cites files by URL (cover, icon, embedded uploads). Whether a URL is
//! mirrored locally depends on where it is hosted and on the active path
//! profile; its resource ID is derived from the URL itself so that repeated
//! references resolve to one local file.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::config::SyncSettings;
use crate::model::{FileResource, ResourceHeader, ResourceId};
use crate::objects::RawObject;
use crate::paths::PathProfile;

/// Lowercased host of an absolute URL, without port or credentials.
pub fn url_host(url: &str) -> Option<String> {
    static HOST: OnceLock<Regex> = OnceLock::new();
    let re = HOST.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://(?:[^@/?#]*@)?([^/?#:]+)").expect("static regex")
    });
    re.captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

fn host_matches(host: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| {
        let p = p.trim().trim_start_matches("*.").to_ascii_lowercase();
        host == p || host.ends_with(&format!(".{p}"))
    })
}

pub fn is_hosted_file(url: &str, settings: &SyncSettings) -> bool {
    url_host(url)
        .map(|h| host_matches(&h, &settings.hosted_file_hosts))
        .unwrap_or(false)
}

pub fn is_video_embed(url: &str, settings: &SyncSettings) -> bool {
    url_host(url)
        .map(|h| host_matches(&h, &settings.video_hosts))
        .unwrap_or(false)
}

/// Files hosted by the remote are always mirrored. External files only when
/// the profile or settings ask for it. Video embeds stay links.
pub fn should_download(url: &str, settings: &SyncSettings, profile: PathProfile) -> bool {
    if url_host(url).is_none() || is_video_embed(url, settings) {
        return false;
    }
    is_hosted_file(url, settings)
        || settings.download_external_files
        || profile.forces_external_download()
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// Content address of a file: SHA-256 of its URL. Signed query strings of
/// remote-hosted files are ignored.
pub fn file_resource_id(url: &str, settings: &SyncSettings) -> ResourceId {
    let key = if is_hosted_file(url, settings) {
        strip_query(url)
    } else {
        url
    };
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Last path segment of the URL, reduced to filesystem-safe characters.
pub fn file_name_from_url(url: &str) -> String {
    let path = strip_query(url);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let segment = match path.split_once('/') {
        Some((_, rest)) => rest.rsplit('/').next().unwrap_or(""),
        None => "",
    };
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// A file a page wants mirrored.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRequest {
    pub id: ResourceId,
    pub url: String,
    pub file_name: String,
}

impl FileRequest {
    pub fn new(url: &str, settings: &SyncSettings) -> Self {
        Self {
            id: file_resource_id(url, settings),
            url: url.to_string(),
            file_name: file_name_from_url(url),
        }
    }

    pub fn to_resource(&self, parent: &ResourceId) -> FileResource {
        let mut header = ResourceHeader::new(self.id.clone(), self.file_name.clone());
        header.parent_resource_id = Some(parent.clone());
        FileResource {
            header,
            source_url: self.url.clone(),
            file_name: self.file_name.clone(),
            referenced_by: BTreeSet::from([parent.clone()]),
        }
    }
}

/// Every downloadable file cited by `objects`, deduplicated by ID, in
/// citation order.
pub fn collect_file_requests<'a>(
    objects: impl IntoIterator<Item = &'a RawObject>,
    settings: &SyncSettings,
    profile: PathProfile,
) -> Vec<FileRequest> {
    let mut requests: Vec<FileRequest> = Vec::new();
    for object in objects {
        for url in object.file_urls() {
            if !should_download(url, settings, profile) {
                continue;
            }
            let request = FileRequest::new(url, settings);
            if !requests.iter().any(|r| r.id == request.id) {
                requests.push(request);
            }
        }
    }
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectKind;

    fn settings() -> SyncSettings {
        SyncSettings {
            hosted_file_hosts: vec!["files.example.com".into()],
            ..SyncSettings::default()
        }
    }

    #[test]
    fn hosted_files_download_and_videos_never_do() {
        let s = settings();
        let hosted = "https://files.example.com/a/b/photo.png?sig=1";
        let external = "https://cdn.other.org/banner.jpg";
        let video = "https://www.youtube.com/watch?v=abc";

        assert!(should_download(hosted, &s, PathProfile::Offline));
        assert!(!should_download(external, &s, PathProfile::Offline));
        assert!(should_download(external, &s, PathProfile::Backup));
        assert!(!should_download(video, &s, PathProfile::Backup));
        assert!(!should_download("not a url", &s, PathProfile::Backup));
    }

    #[test]
    fn hosted_ids_ignore_signature_query() {
        let s = settings();
        let a = file_resource_id("https://files.example.com/x/photo.png?sig=1", &s);
        let b = file_resource_id("https://files.example.com/x/photo.png?sig=2", &s);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = file_resource_id("https://cdn.other.org/x.png?v=1", &s);
        let d = file_resource_id("https://cdn.other.org/x.png?v=2", &s);
        assert_ne!(c, d);
    }

    #[test]
    fn file_names_come_from_the_last_segment() {
        assert_eq!(file_name_from_url("https://h.com/a/My Photo.png?x=1"), "My-Photo.png");
        assert_eq!(file_name_from_url("https://h.com/"), "file");
        assert_eq!(file_name_from_url("https://h.com"), "file");
    }

    #[test]
    fn requests_are_deduplicated_across_objects() {
        let s = settings();
        let mut page = RawObject::new("p", ObjectKind::Page);
        page.cover_url = Some("https://files.example.com/c.png?sig=1".into());
        let mut block = RawObject::new("b", ObjectKind::Block);
        block.file_url = Some("https://files.example.com/c.png?sig=2".into());
        let mut video = RawObject::new("v", ObjectKind::Block);
        video.file_url = Some("https://youtu.be/xyz".into());

        let requests = collect_file_requests([&page, &block, &video], &s, PathProfile::Offline);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].file_name, "c.png");
    }
}
