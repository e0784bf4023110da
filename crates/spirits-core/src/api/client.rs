//! Resource fetching for catalog data and images.
//!
//! This module provides the `ResourceFetcher` trait that the storage
//! strategies and the sync flow use to pull remote resources, and the
//! `HttpFetcher` implementation backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use tracing::{debug, warn};

use super::FetchError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const USER_AGENT: &str = concat!("spirits/", env!("CARGO_PKG_VERSION"));

/// How a fetched body should be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Text,
    Json,
    Binary,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Text => "text",
            ResourceKind::Json => "json",
            ResourceKind::Binary => "binary",
        }
    }
}

/// Binary payload together with the server-reported content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBinary {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Text(String),
    Json(serde_json::Value),
    Binary(FetchedBinary),
}

impl Resource {
    fn kind(&self) -> ResourceKind {
        match self {
            Resource::Text(_) => ResourceKind::Text,
            Resource::Json(_) => ResourceKind::Json,
            Resource::Binary(_) => ResourceKind::Binary,
        }
    }
}

fn unexpected(url: &str, expected: ResourceKind, got: &Resource) -> FetchError {
    FetchError::Decode {
        url: url.to_string(),
        kind: expected.as_str(),
        reason: format!("fetcher returned a {} resource", got.kind().as_str()),
    }
}

/// Network retrieval with typed decoding.
///
/// Implementations must reject non-success responses with a `FetchError`
/// describing the status instead of handing back the error body.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str, kind: ResourceKind) -> Result<Resource, FetchError>;

    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        match self.fetch(url, ResourceKind::Text).await? {
            Resource::Text(text) => Ok(text),
            other => Err(unexpected(url, ResourceKind::Text, &other)),
        }
    }

    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        match self.fetch(url, ResourceKind::Json).await? {
            Resource::Json(value) => Ok(value),
            other => Err(unexpected(url, ResourceKind::Json, &other)),
        }
    }

    async fn fetch_binary(&self, url: &str) -> Result<FetchedBinary, FetchError> {
        match self.fetch(url, ResourceKind::Binary).await? {
            Resource::Binary(binary) => Ok(binary),
            other => Err(unexpected(url, ResourceKind::Binary, &other)),
        }
    }
}

/// HTTP fetcher.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(None) for rate limit (should retry).
    async fn check_response_for_retry(
        url: &str,
        response: Response,
    ) -> Result<Option<Response>, FetchError> {
        let status = response.status();
        if status.is_success() {
            Ok(Some(response))
        } else if status.as_u16() == 429 {
            Ok(None)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::from_status(url, status, &body))
        }
    }

    async fn get(&self, url: &str) -> Result<Response, FetchError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.client.get(url).send().await?;

            match Self::check_response_for_retry(url, response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(FetchError::RateLimited(url.to_string()));
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, kind: ResourceKind) -> Result<Resource, FetchError> {
        debug!(url = url, kind = kind.as_str(), "Fetching resource");
        let response = self.get(url).await?;

        match kind {
            ResourceKind::Text => Ok(Resource::Text(response.text().await?)),
            ResourceKind::Json => {
                let text = response.text().await?;
                serde_json::from_str(&text)
                    .map(Resource::Json)
                    .map_err(|e| FetchError::Decode {
                        url: url.to_string(),
                        kind: kind.as_str(),
                        reason: e.to_string(),
                    })
            }
            ResourceKind::Binary => {
                let content_type = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                let bytes = response.bytes().await?.to_vec();
                Ok(Resource::Binary(FetchedBinary { bytes, content_type }))
            }
        }
    }
}
