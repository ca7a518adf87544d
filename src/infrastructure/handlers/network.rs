//! Downloads `http`/`https` URIs through a [`Downloader`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::entities::{LoadedFrom, NetworkInfo, NetworkPolicy, Request};
use crate::domain::errors::LoadError;
use crate::domain::ports::{CacheControl, DownloadRequest, Downloader, LoadResult, RequestHandler};
use crate::infrastructure::stats::Stats;

const SCHEME_HTTP: &str = "http";
const SCHEME_HTTPS: &str = "https";
const RETRY_COUNT: u32 = 2;

/// Handles network URIs. Registered last as the catch-all.
pub struct NetworkRequestHandler {
    downloader: Arc<dyn Downloader>,
    stats: Arc<Stats>,
}

impl NetworkRequestHandler {
    #[must_use]
    pub fn new(downloader: Arc<dyn Downloader>, stats: Arc<Stats>) -> Self {
        Self { downloader, stats }
    }
}

impl std::fmt::Debug for NetworkRequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRequestHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl RequestHandler for NetworkRequestHandler {
    fn name(&self) -> &'static str {
        "network"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(
            request.locator().scheme(),
            Some(SCHEME_HTTP | SCHEME_HTTPS)
        )
    }

    async fn load(
        &self,
        request: &Request,
        network_policy: NetworkPolicy,
    ) -> Result<LoadResult, LoadError> {
        let url = request.uri().ok_or_else(|| LoadError::UnrecognizedRequest {
            request: request.to_string(),
        })?;
        let response = self
            .downloader
            .load(DownloadRequest {
                url: url.clone(),
                cache_control: CacheControl::from_policy(network_policy),
            })
            .await?;

        if !response.is_successful() {
            return Err(LoadError::Response {
                code: response.code,
                offline: network_policy.is_offline_only(),
            });
        }

        let loaded_from = if response.from_cache {
            LoadedFrom::Disk
        } else {
            LoadedFrom::Network
        };

        // Seen spuriously when a cached response is replayed.
        if loaded_from == LoadedFrom::Disk && response.content_length == Some(0) {
            debug!(request = %request.log_id(), "Empty body from disk cache");
            return Err(LoadError::ContentLength);
        }
        if loaded_from == LoadedFrom::Network
            && let Some(length) = response.content_length.filter(|length| *length > 0)
        {
            self.stats.dispatch_download_finished(length);
        }

        Ok(LoadResult::stream(response.body, loaded_from))
    }

    fn retry_count(&self) -> u32 {
        RETRY_COUNT
    }

    fn should_retry(&self, _airplane_mode: bool, info: Option<&NetworkInfo>) -> bool {
        info.is_none_or(NetworkInfo::is_connected)
    }

    fn supports_replay(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ConnectionType, ImageLocator};
    use crate::domain::ports::DownloadResponse;
    use crate::domain::ports::mocks::MockDownloader;
    use crate::infrastructure::cache::NoCache;
    use bytes::Bytes;
    use mockall::predicate::function;
    use url::Url;

    fn request() -> Request {
        Request::builder(ImageLocator::Uri(
            Url::parse("https://example.com/cat.png").unwrap(),
        ))
        .build()
        .unwrap()
    }

    fn response(code: u16, body: &'static [u8], from_cache: bool) -> DownloadResponse {
        DownloadResponse {
            code,
            body: Bytes::from_static(body),
            content_length: Some(body.len() as u64),
            from_cache,
        }
    }

    fn handler(downloader: MockDownloader) -> (NetworkRequestHandler, Arc<Stats>) {
        let stats = Arc::new(Stats::new(Arc::new(NoCache)));
        (
            NetworkRequestHandler::new(Arc::new(downloader), stats.clone()),
            stats,
        )
    }

    #[tokio::test]
    async fn test_network_response_records_download() {
        let mut downloader = MockDownloader::new();
        downloader
            .expect_load()
            .times(1)
            .returning(|_| Ok(response(200, b"abcd", false)));
        let (handler, stats) = handler(downloader);

        let result = handler.load(&request(), NetworkPolicy::empty()).await.unwrap();

        assert_eq!(result.loaded_from(), LoadedFrom::Network);
        stats.flush().await;
        assert_eq!(stats.snapshot().total_download_size, 4);
    }

    #[tokio::test]
    async fn test_cached_response_is_disk() {
        let mut downloader = MockDownloader::new();
        downloader
            .expect_load()
            .returning(|_| Ok(response(200, b"abcd", true)));
        let (handler, stats) = handler(downloader);

        let result = handler.load(&request(), NetworkPolicy::empty()).await.unwrap();

        assert_eq!(result.loaded_from(), LoadedFrom::Disk);
        stats.flush().await;
        assert_eq!(stats.snapshot().download_count, 0);
    }

    #[tokio::test]
    async fn test_empty_cached_body_is_content_length_error() {
        let mut downloader = MockDownloader::new();
        downloader
            .expect_load()
            .returning(|_| Ok(response(200, b"", true)));
        let (handler, _stats) = handler(downloader);

        let err = handler.load(&request(), NetworkPolicy::empty()).await.unwrap_err();
        assert_eq!(err, LoadError::ContentLength);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_offline_policy_forces_cache_and_504_is_terminal() {
        let mut downloader = MockDownloader::new();
        downloader
            .expect_load()
            .with(function(|r: &DownloadRequest| {
                r.cache_control.is_some_and(|c| c.force_cache)
            }))
            .returning(|_| Ok(response(504, b"", false)));
        let (handler, _stats) = handler(downloader);

        let err = handler
            .load(&request(), NetworkPolicy::OFFLINE)
            .await
            .unwrap_err();
        assert_eq!(err, LoadError::Response { code: 504, offline: true });
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut downloader = MockDownloader::new();
        downloader
            .expect_load()
            .returning(|_| Ok(response(503, b"", false)));
        let (handler, _stats) = handler(downloader);

        let err = handler.load(&request(), NetworkPolicy::empty()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_retry_policy() {
        let (handler, _stats) = handler(MockDownloader::new());
        assert_eq!(handler.retry_count(), 2);
        assert!(handler.supports_replay());
        assert!(handler.should_retry(false, None));
        assert!(handler.should_retry(false, Some(&NetworkInfo::connected(ConnectionType::Wifi))));
        assert!(!handler.should_retry(false, Some(&NetworkInfo::disconnected())));
    }

    #[test]
    fn test_claims_http_and_https_only() {
        let handler = NetworkRequestHandler::new(
            Arc::new(MockDownloader::new()),
            Arc::new(tokio_test::block_on(async { Stats::new(Arc::new(NoCache)) })),
        );
        let ftp = Request::builder(ImageLocator::Uri(Url::parse("ftp://x.org/a.png").unwrap()))
            .build()
            .unwrap();
        assert!(handler.can_handle(&request()));
        assert!(!handler.can_handle(&ftp));
    }
}
