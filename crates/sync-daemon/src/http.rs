//! Request/response client for the workspace HTTP API.
//!
//! Wraps `reqwest::Client` with basic auth, JSON default headers and base
//! URL construction, and classifies every failure into `RemoteError`.
//! Transport failures, 5xx and 429 responses are retried per `RetryConfig`
//! before surfacing as `Unreachable`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sync_core::record::{FileId, FileRecord, NewFile};
use sync_core::remote::{RemoteError, RemoteStore, Result};
use sync_core::SyncConfig;
use tracing::{debug, warn};

use crate::backoff::RetryConfig;

/// A remote workspace as returned by the lookup endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize)]
struct CreateFileBody<'a> {
    workspace_id: i64,
    workspace_path: &'a str,
    mime_type: &'a str,
    content: String,
}

#[derive(Serialize)]
struct UpdateFileBody {
    content: String,
}

#[derive(Serialize)]
struct MoveFileBody<'a> {
    workspace_path: &'a str,
}

/// `RemoteStore` over the workspace HTTP API.
pub struct HttpRemoteStore {
    client: Client,
    /// Base URL without trailing slash
    base_url: String,
    username: String,
    password: String,
    retry: RetryConfig,
}

impl HttpRemoteStore {
    /// Build a client for the server and credentials in `config`.
    pub fn new(config: &SyncConfig) -> reqwest::Result<Self> {
        Self::with_base_url(config, config.http_base_url())
    }

    /// Build a client against a custom base URL (useful for testing).
    pub fn with_base_url(config: &SyncConfig, base_url: impl Into<String>) -> reqwest::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: config.workspace_name.clone(),
            password: config.workspace_pass.clone(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request builder for `path`.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    fn request_url(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    /// URL for `segments` under the base URL, each one percent-encoded.
    fn segment_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RemoteError::Unreachable(format!("Invalid server URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Unreachable(format!("Invalid server URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Look up a workspace id by name.
    pub async fn resolve_workspace(&self, name: &str) -> Result<Workspace> {
        let url = self.segment_url(&["api", "v1", "workspaces", name])?;
        let response = self
            .execute(url.path(), || self.request_url(Method::GET, url.clone()))
            .await?;
        parse_json(response).await
    }

    /// Send a request, retrying transient failures.
    ///
    /// `build` is called once per try since a `RequestBuilder` is consumed
    /// by `send`.
    async fn execute(&self, what: &str, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match build().send().await {
                Ok(response) => match classify(response).await {
                    Ok(response) => return Ok(response),
                    Err(err) => err,
                },
                Err(e) => RemoteError::Unreachable(e.to_string()),
            };

            if !matches!(error, RemoteError::Unreachable(_)) || attempt >= self.retry.max_attempts {
                debug!("{} failed after {} attempt(s): {}", what, attempt, error);
                return Err(error);
            }

            let delay = self.retry.delay_after(attempt);
            warn!("{} failed ({}), retrying in {:?}", what, error, delay);
            tokio::time::sleep(delay).await;
        }
    }
}

/// Map a response status onto the remote error taxonomy.
async fn classify(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::NOT_FOUND => RemoteError::NotFound(detail),
        StatusCode::CONFLICT => RemoteError::Conflict(detail),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::Unreachable(detail),
        s if s.is_server_error() => RemoteError::Unreachable(detail),
        _ => RemoteError::Deserialization(format!("unexpected status {}", detail)),
    })
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Deserialization(e.to_string()))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create_file(&self, file: &NewFile, content: &[u8]) -> Result<FileRecord> {
        let body = CreateFileBody {
            workspace_id: file.workspace_id,
            workspace_path: &file.workspace_path,
            mime_type: &file.mime_type,
            content: STANDARD.encode(content),
        };
        let what = format!("create {}", file.workspace_path);
        let response = self
            .execute(&what, || self.request(Method::POST, "/api/v1/files").json(&body))
            .await?;
        parse_json(response).await
    }

    async fn update_file(&self, id: FileId, content: &[u8]) -> Result<FileRecord> {
        let body = UpdateFileBody {
            content: STANDARD.encode(content),
        };
        let path = format!("/api/v1/files/{}", id);
        let response = self
            .execute(&path, || self.request(Method::POST, &path).json(&body))
            .await?;
        parse_json(response).await
    }

    async fn rename_file(&self, id: FileId, new_path: &str) -> Result<FileRecord> {
        let body = MoveFileBody {
            workspace_path: new_path,
        };
        let path = format!("/api/v1/files/{}/move", id);
        let response = self
            .execute(&path, || self.request(Method::POST, &path).json(&body))
            .await?;
        parse_json(response).await
    }

    async fn delete_file(&self, id: FileId) -> Result<()> {
        let path = format!("/api/v1/files/{}", id);
        self.execute(&path, || self.request(Method::DELETE, &path))
            .await?;
        Ok(())
    }

    async fn fetch_file(&self, id: FileId) -> Result<Vec<u8>> {
        let path = format!("/api/v1/files/{}/content", id);
        let response = self
            .execute(&path, || self.request(Method::GET, &path))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        debug!("Fetched {} bytes for file {}", bytes.len(), id);
        Ok(bytes.to_vec())
    }

    async fn list_files(&self, workspace_id: i64) -> Result<Vec<FileRecord>> {
        let path = format!("/api/v1/workspaces/{}/files", workspace_id);
        let response = self
            .execute(&path, || self.request(Method::GET, &path))
            .await?;
        parse_json(response).await
    }
}
