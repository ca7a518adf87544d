//! Port definition for HTTP downloads.

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::domain::entities::NetworkPolicy;
use crate::domain::errors::LoadError;

/// Cache directives sent with a download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// Serve only from the disk cache; a miss yields 504.
    pub force_cache: bool,
    /// Do not read from the disk cache.
    pub no_cache: bool,
    /// Do not write the response to the disk cache.
    pub no_store: bool,
}

impl CacheControl {
    /// Maps network policy bits to cache directives.
    ///
    /// Returns `None` for the empty policy, meaning default caching.
    #[must_use]
    pub fn from_policy(policy: NetworkPolicy) -> Option<Self> {
        if policy.is_empty() {
            return None;
        }
        if policy.is_offline_only() {
            return Some(Self {
                force_cache: true,
                ..Self::default()
            });
        }
        Some(Self {
            force_cache: false,
            no_cache: !policy.should_read_from_disk_cache(),
            no_store: !policy.should_write_to_disk_cache(),
        })
    }
}

/// A single download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: Url,
    pub cache_control: Option<CacheControl>,
}

/// A completed HTTP exchange, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResponse {
    pub code: u16,
    pub body: Bytes,
    pub content_length: Option<u64>,
    /// Whether the body came from the disk cache.
    pub from_cache: bool,
}

impl DownloadResponse {
    #[must_use]
    pub const fn is_successful(&self) -> bool {
        self.code >= 200 && self.code < 300
    }
}

/// Fetches remote image bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Performs the request. Non-2xx responses are returned, not raised.
    async fn load(&self, request: DownloadRequest) -> Result<DownloadResponse, LoadError>;

    /// Releases resources held by the downloader.
    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(NetworkPolicy::empty(), None ; "empty_policy")]
    #[test_case(NetworkPolicy::OFFLINE, Some(CacheControl { force_cache: true, no_cache: false, no_store: false }) ; "offline")]
    #[test_case(NetworkPolicy::OFFLINE | NetworkPolicy::NO_STORE, Some(CacheControl { force_cache: true, no_cache: false, no_store: false }) ; "offline_wins")]
    #[test_case(NetworkPolicy::NO_CACHE, Some(CacheControl { force_cache: false, no_cache: true, no_store: false }) ; "no_cache")]
    #[test_case(NetworkPolicy::NO_CACHE | NetworkPolicy::NO_STORE, Some(CacheControl { force_cache: false, no_cache: true, no_store: true }) ; "no_cache_no_store")]
    fn test_cache_control_from_policy(policy: NetworkPolicy, expected: Option<CacheControl>) {
        assert_eq!(CacheControl::from_policy(policy), expected);
    }
}
