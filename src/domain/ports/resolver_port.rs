//! Ports for host-provided byte sources.

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::domain::errors::LoadError;

/// Opens `content://` URIs.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn open(&self, uri: &Url) -> Result<Bytes, LoadError>;
}

/// Opens files bundled with the application by relative path.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn open(&self, path: &str) -> Result<Bytes, LoadError>;
}

/// Opens bundled resources by numeric id.
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    async fn open(&self, id: u32) -> Result<Bytes, LoadError>;

    /// Looks up a resource id by package, type and name, as used by
    /// `android.resource://package/type/name` URIs.
    fn identifier(&self, _package: &str, _kind: &str, _name: &str) -> Option<u32> {
        None
    }
}
