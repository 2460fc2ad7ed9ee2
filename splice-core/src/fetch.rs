use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use url::Url;

use crate::config::FetchSection;
use crate::headers::HeaderRegistry;
use crate::source::{RequestHeaders, TrackDescriptor};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("failed to read {path}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid url {url}")]
    InvalidUrl { url: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// One outbound GET: the target URL and the headers carried by its
/// descriptor. Registry overrides are applied by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Option<RequestHeaders>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: None,
        }
    }
}

impl From<&TrackDescriptor> for FetchRequest {
    fn from(descriptor: &TrackDescriptor) -> Self {
        Self {
            url: descriptor.url.clone(),
            headers: descriptor.request_headers.clone(),
        }
    }
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<Bytes>;
}

/// Fetches over HTTP with reqwest; `file://` URLs are read from disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    registry: Arc<HeaderRegistry>,
}

impl HttpFetcher {
    pub fn new(config: &FetchSection, registry: Arc<HeaderRegistry>) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| FetchError::Transport {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client, registry })
    }

    pub fn with_client(client: Client, registry: Arc<HeaderRegistry>) -> Self {
        Self { client, registry }
    }

    /// Descriptor headers with the registry's entry for the URL laid over them.
    pub fn effective_headers(&self, request: &FetchRequest) -> RequestHeaders {
        let mut merged = request.headers.clone().unwrap_or_default();
        if let Some(overrides) = self.registry.lookup(&request.url) {
            merged.extend(overrides);
        }
        merged
    }

    fn header_map(url: &str, headers: &RequestHeaders) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => warn!(url, header = %name, "skipping header that is not valid HTTP"),
            }
        }
        map
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<Bytes> {
        let url = request.url.as_str();
        if let Ok(parsed) = Url::parse(url) {
            if parsed.scheme() == "file" {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| FetchError::InvalidUrl { url: url.into() })?;
                let data = fs::read(&path)
                    .await
                    .map_err(|source| FetchError::Io { source, path })?;
                return Ok(Bytes::from(data));
            }
        }

        let headers = self.effective_headers(request);
        debug!(url, headers = headers.len(), "fetching media resource");
        let transport = |err: reqwest::Error| FetchError::Transport {
            url: url.into(),
            message: err.to_string(),
        };
        let response = self
            .client
            .get(url)
            .headers(Self::header_map(url, &headers))
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.into(),
                status: status.as_u16(),
            });
        }
        response.bytes().await.map_err(transport)
    }
}
