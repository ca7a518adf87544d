//! Port definition for pluggable image sources.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::{Bitmap, LoadedFrom, NetworkInfo, NetworkPolicy, Request};
use crate::domain::errors::LoadError;

/// What a handler produced: a decoded bitmap or encoded bytes, never both.
#[derive(Debug, Clone)]
pub enum LoadPayload {
    /// Already decoded.
    Bitmap(Bitmap),
    /// Encoded image data still to be decoded.
    Stream(Bytes),
}

/// Successful output of a [`RequestHandler`].
#[derive(Debug, Clone)]
pub struct LoadResult {
    payload: LoadPayload,
    loaded_from: LoadedFrom,
    exif_orientation: Option<u8>,
}

impl LoadResult {
    /// A decoded bitmap result.
    #[must_use]
    pub const fn bitmap(bitmap: Bitmap, loaded_from: LoadedFrom) -> Self {
        Self {
            payload: LoadPayload::Bitmap(bitmap),
            loaded_from,
            exif_orientation: None,
        }
    }

    /// An encoded byte stream result.
    #[must_use]
    pub const fn stream(bytes: Bytes, loaded_from: LoadedFrom) -> Self {
        Self {
            payload: LoadPayload::Stream(bytes),
            loaded_from,
            exif_orientation: None,
        }
    }

    /// Attaches an EXIF orientation value (1-8) known to the handler.
    #[must_use]
    pub const fn with_exif_orientation(mut self, orientation: u8) -> Self {
        self.exif_orientation = Some(orientation);
        self
    }

    #[must_use]
    pub const fn payload(&self) -> &LoadPayload {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> LoadPayload {
        self.payload
    }

    #[must_use]
    pub const fn loaded_from(&self) -> LoadedFrom {
        self.loaded_from
    }

    #[must_use]
    pub const fn exif_orientation(&self) -> Option<u8> {
        self.exif_orientation
    }
}

/// A source of images claimed by predicate.
///
/// The first registered handler whose [`can_handle`](Self::can_handle)
/// returns true loads the request.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this handler claims the request.
    fn can_handle(&self, request: &Request) -> bool;

    /// Loads the request.
    async fn load(
        &self,
        request: &Request,
        network_policy: NetworkPolicy,
    ) -> Result<LoadResult, LoadError>;

    /// Number of retries granted to a hunt using this handler.
    fn retry_count(&self) -> u32 {
        0
    }

    /// Whether a failed load should be retried given the current connectivity.
    fn should_retry(&self, _airplane_mode: bool, _info: Option<&NetworkInfo>) -> bool {
        false
    }

    /// Whether failed actions may be replayed once connectivity returns.
    fn supports_replay(&self) -> bool {
        false
    }
}
