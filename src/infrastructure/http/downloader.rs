//! reqwest-backed downloader with an optional disk cache in front.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace, warn};
use url::Url;

use crate::domain::errors::LoadError;
use crate::domain::ports::{DownloadRequest, DownloadResponse, Downloader};
use crate::infrastructure::cache::{DEFAULT_DISK_CACHE_SIZE, DiskCache};

/// Default request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Status returned for an offline-only request that missed the disk cache.
const GATEWAY_TIMEOUT: u16 = 504;

/// Downloads over HTTP(S), serving and storing bodies through a [`DiskCache`].
pub struct HttpDownloader {
    client: reqwest::Client,
    disk_cache: Option<Arc<DiskCache>>,
}

impl std::fmt::Debug for HttpDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDownloader")
            .field("disk_cache", &self.disk_cache.as_ref().map(|c| c.dir().to_path_buf()))
            .finish_non_exhaustive()
    }
}

impl HttpDownloader {
    /// Creates a downloader.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(disk_cache: Option<Arc<DiskCache>>, timeout: Duration) -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoadError::network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, disk_cache })
    }

    /// Creates a downloader with a disk cache in the platform cache directory.
    ///
    /// # Errors
    /// Returns error if the disk cache or HTTP client cannot be created.
    pub async fn with_defaults() -> Result<Self, LoadError> {
        let disk_cache = Arc::new(DiskCache::default_location(DEFAULT_DISK_CACHE_SIZE).await?);
        Self::new(Some(disk_cache), Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    #[must_use]
    pub fn disk_cache(&self) -> Option<&Arc<DiskCache>> {
        self.disk_cache.as_ref()
    }

    async fn fetch(&self, url: &Url) -> Result<DownloadResponse, LoadError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| LoadError::network(format!("Request failed: {e}")))?;

        let code = response.status().as_u16();
        let content_length = response.content_length();
        let body = response
            .bytes()
            .await
            .map_err(|e| LoadError::network(format!("Failed to read body: {e}")))?;

        Ok(DownloadResponse {
            code,
            content_length: content_length.or(Some(body.len() as u64)),
            body,
            from_cache: false,
        })
    }

    fn store_in_background(&self, url: &Url, body: &Bytes) {
        let Some(disk_cache) = self.disk_cache.clone() else {
            return;
        };
        let url = url.clone();
        let body = body.clone();
        tokio::spawn(async move {
            if let Err(e) = disk_cache.put(&url, &body).await {
                warn!(url = %url, error = %e, "Failed to cache to disk");
            }
        });
    }
}

fn cached_response(body: Bytes) -> DownloadResponse {
    DownloadResponse {
        code: 200,
        content_length: Some(body.len() as u64),
        body,
        from_cache: true,
    }
}

fn cache_miss_response() -> DownloadResponse {
    DownloadResponse {
        code: GATEWAY_TIMEOUT,
        body: Bytes::new(),
        content_length: Some(0),
        from_cache: false,
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn load(&self, request: DownloadRequest) -> Result<DownloadResponse, LoadError> {
        let control = request.cache_control.unwrap_or_default();
        let url = &request.url;

        if control.force_cache {
            let cached = match &self.disk_cache {
                Some(disk_cache) => disk_cache.get(url).await,
                None => None,
            };
            return Ok(cached.map_or_else(
                || {
                    debug!(url = %url, "Offline request missed the disk cache");
                    cache_miss_response()
                },
                cached_response,
            ));
        }

        if !control.no_cache
            && let Some(disk_cache) = &self.disk_cache
            && let Some(body) = disk_cache.get(url).await
        {
            trace!(url = %url, "Served from disk cache");
            return Ok(cached_response(body));
        }

        debug!(url = %url, "Downloading image from network");
        let response = self.fetch(url).await?;
        if response.is_successful() && !control.no_store && !response.body.is_empty() {
            self.store_in_background(url, &response.body);
        }
        Ok(response)
    }
}
