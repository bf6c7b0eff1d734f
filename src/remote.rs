//! HTTP implementation of the core `RemoteSource` contract.
//!
//! Endpoints, relative to the configured base URL:
//! - `GET /nodes/{id}`: node header
//! - `GET /nodes/{id}/content`: node, descendant objects and graph
//! - `GET /nodes/{id}/properties`: row property values
//! - `GET /databases/{id}/rows?cursor=&since=`: one page of rows

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagesync_core::contract::{ChildBatch, FetchedContent, RemoteHeader, RemoteSource, SourceError};
use pagesync_core::objects::{ObjectGraph, ObjectKind, RawObject};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, error};

#[derive(Deserialize)]
struct NodeHeader {
    id: String,
    kind: ObjectKind,
    #[serde(default)]
    last_edited_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct NodeContent {
    root: RawObject,
    #[serde(default)]
    objects: Vec<RawObject>,
    graph: ObjectGraph,
}

#[derive(Deserialize)]
struct RowPage {
    #[serde(default)]
    results: Vec<RawObject>,
    #[serde(default)]
    next_cursor: Option<String>,
}

pub struct HttpRemoteSource {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteSource {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = self.url(path);
        debug!(url = %url, "Fetching remote JSON");
        let response = self.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
            error!(status = %status, url = %url, "Remote API returned error. Response body: {body}");
            return Err(format!("{url} returned {status}").into());
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn fetch_header(&self, id: &str) -> Result<RemoteHeader, SourceError> {
        let header: NodeHeader = self.get_json(&format!("nodes/{id}"), &[]).await?;
        Ok(RemoteHeader {
            id: header.id,
            kind: header.kind,
            last_edited_time: header.last_edited_time,
        })
    }

    async fn fetch_full(&self, id: &str) -> Result<FetchedContent, SourceError> {
        let content: NodeContent = self.get_json(&format!("nodes/{id}/content"), &[]).await?;
        Ok(FetchedContent {
            root: content.root,
            objects: content.objects,
            graph: content.graph,
        })
    }

    async fn enumerate_children(
        &self,
        database_id: &str,
        since: Option<DateTime<Utc>>,
        cursor: Option<String>,
    ) -> Result<ChildBatch, SourceError> {
        let mut query = Vec::new();
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339()));
        }
        let page: RowPage = self
            .get_json(&format!("databases/{database_id}/rows"), &query)
            .await?;
        Ok(ChildBatch {
            objects: page.results,
            next_cursor: page.next_cursor.filter(|c| !c.is_empty()),
        })
    }

    async fn fetch_properties(&self, page_id: &str) -> Result<Map<String, Value>, SourceError> {
        self.get_json(&format!("nodes/{page_id}/properties"), &[])
            .await
    }

    async fn download_binary(&self, url: &str, dest: &Path) -> Result<(), SourceError> {
        debug!(url = %url, dest = %dest.display(), "Downloading binary");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}
