//! Explicit per-upload HTTP session.
//!
//! All connection state — cookie jar, Basic credentials, optional client
//! certificate, base URLs — lives in one object passed by reference
//! through the call chain. Concurrent sessions each get their own.

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::{ClientError, request_error};

fn default_timeout_secs() -> u64 {
    300
}

/// Basic authentication credentials for the ingest frontend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Connection settings for one ingest session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestConfig {
    /// Base URL of the metadata server (file listings).
    pub metadata_base_url: String,
    /// Base URL of the ingest server (preallocate, upload, status).
    pub ingest_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// PEM bundle holding a client certificate and key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_identity_pem: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Use the legacy CGI preallocate handshake and XML status endpoint
    /// instead of the JSON ones.
    #[serde(default)]
    pub legacy_endpoints: bool,
}

impl IngestConfig {
    /// Minimal config pointing both servers at the same base URL.
    pub fn new(metadata_base_url: impl Into<String>, ingest_base_url: impl Into<String>) -> Self {
        Self {
            metadata_base_url: metadata_base_url.into(),
            ingest_base_url: ingest_base_url.into(),
            credentials: None,
            client_identity_pem: None,
            request_timeout_secs: default_timeout_secs(),
            legacy_endpoints: false,
        }
    }
}

/// One upload session's HTTP state.
#[derive(Debug)]
pub struct IngestSession {
    http: reqwest::Client,
    config: IngestConfig,
}

impl IngestSession {
    /// Builds the session: cookie store on, credentials as a default
    /// Authorization header, optional client identity loaded from PEM.
    pub fn new(config: IngestConfig) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.request_timeout_secs));

        if let Some(path) = &config.client_identity_pem {
            let pem = std::fs::read(path)?;
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ClientError::Auth(format!("client identity: {e}")))?;
            builder = builder.identity(identity);
        }

        let mut headers = HeaderMap::new();
        if let Some(creds) = &config.credentials {
            let token = BASE64.encode(format!("{}:{}", creds.username, creds.password));
            let mut value = HeaderValue::from_str(&format!("Basic {token}"))
                .map_err(|_| ClientError::Auth("credentials contain invalid characters".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = builder
            .default_headers(headers)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Joins a path onto the metadata server base URL.
    pub fn metadata_url(&self, path: &str) -> String {
        join_url(&self.config.metadata_base_url, path)
    }

    /// Joins a path onto the ingest server base URL.
    pub fn ingest_url(&self, path: &str) -> String {
        join_url(&self.config.ingest_base_url, path)
    }

    /// GET returning the response body, with the crate's standard status
    /// classification (401/403 → Auth, other non-success → Api).
    pub(crate) async fn get_text(&self, url: &str, op: &str) -> Result<String, ClientError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(op, e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| request_error(op, e))?;
        classify_status(op, status, body)
    }
}

pub(crate) fn classify_status(
    op: &str,
    status: StatusCode,
    body: String,
) -> Result<String, ClientError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ClientError::Auth(format!("{op}: HTTP {status}: {body}")));
    }
    if !status.is_success() {
        return Err(ClientError::Api {
            op: op.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
