//! Transfer endpoint contract and its HTTP implementation.

use crate::error::SyncError;
use crate::path::RelativePath;
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

/// Route serving the serialized manifest.
pub const MANIFEST_ROUTE: &str = "/manifest";

/// Route prefix serving raw file content.
pub const DATA_ROUTE_PREFIX: &str = "/data";

/// The two read-only operations a provider exposes to fetchers.
#[async_trait]
pub trait TransferEndpoint: Send + Sync {
    /// Returns the serialized manifest.
    async fn fetch_manifest(&self) -> Result<Vec<u8>, SyncError>;

    /// Returns the raw bytes of the file at `path` below the provider's root.
    async fn fetch_file(&self, path: &RelativePath) -> Result<Vec<u8>, SyncError>;
}

/// [`TransferEndpoint`] talking to a provider over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpEndpoint {
    /// Creates an endpoint for `base_url` (e.g. `http://localhost:8080`).
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, SyncError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let parsed = Url::parse(base_url).map_err(|e| SyncError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a base URL".to_string(),
            });
        }
        Ok(Self {
            base_url: parsed,
            client: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    ///
    /// File names may hold `#`, `?` or `%`, which must not be read as URL syntax.
    fn url_for<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "not a base URL".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: Url, what: &str) -> Result<Vec<u8>, SyncError> {
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                404 => SyncError::NotFound(what.to_string()),
                503 => SyncError::Unavailable(url.to_string()),
                code => SyncError::Transport {
                    url: url.to_string(),
                    status: code,
                },
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl TransferEndpoint for HttpEndpoint {
    async fn fetch_manifest(&self) -> Result<Vec<u8>, SyncError> {
        let url = self.url_for([MANIFEST_ROUTE.trim_start_matches('/')])?;
        self.get(url, "manifest").await
    }

    async fn fetch_file(&self, path: &RelativePath) -> Result<Vec<u8>, SyncError> {
        let prefix = DATA_ROUTE_PREFIX.trim_start_matches('/');
        let url = self.url_for(std::iter::once(prefix).chain(path.segments()))?;
        self.get(url, path.as_str()).await
    }
}
