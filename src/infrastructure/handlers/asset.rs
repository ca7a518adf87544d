//! Loads application assets addressed as `file:///android_asset/<path>`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::{LoadedFrom, NetworkPolicy, Request};
use crate::domain::errors::LoadError;
use crate::domain::ports::{AssetResolver, LoadResult, RequestHandler};

/// First path segment marking an asset URI.
pub const ANDROID_ASSET: &str = "android_asset";

fn asset_path(request: &Request) -> Option<String> {
    let uri = request.uri()?;
    if uri.scheme() != "file" {
        return None;
    }
    let mut segments = uri.path_segments()?;
    if segments.next()? != ANDROID_ASSET {
        return None;
    }
    Some(segments.collect::<Vec<_>>().join("/"))
}

/// Handles asset URIs. Must be registered before [`FileRequestHandler`](super::FileRequestHandler).
pub struct AssetRequestHandler {
    resolver: Option<Arc<dyn AssetResolver>>,
}

impl AssetRequestHandler {
    #[must_use]
    pub fn new(resolver: Option<Arc<dyn AssetResolver>>) -> Self {
        Self { resolver }
    }
}

impl std::fmt::Debug for AssetRequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRequestHandler")
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

#[async_trait]
impl RequestHandler for AssetRequestHandler {
    fn name(&self) -> &'static str {
        "asset"
    }

    fn can_handle(&self, request: &Request) -> bool {
        asset_path(request).is_some()
    }

    async fn load(
        &self,
        request: &Request,
        _network_policy: NetworkPolicy,
    ) -> Result<LoadResult, LoadError> {
        let path = asset_path(request).ok_or_else(|| LoadError::UnrecognizedRequest {
            request: request.to_string(),
        })?;
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| LoadError::not_found(format!("No asset resolver for {path}")))?;
        let bytes = resolver.open(&path).await?;
        Ok(LoadResult::stream(bytes, LoadedFrom::Disk))
    }
}

/// Resolves assets relative to a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryAssetResolver {
    root: PathBuf,
}

impl DirectoryAssetResolver {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AssetResolver for DirectoryAssetResolver {
    async fn open(&self, path: &str) -> Result<Bytes, LoadError> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(LoadError::not_found(format!("Asset path escapes root: {path}")));
        }
        let bytes = tokio::fs::read(self.root.join(relative)).await?;
        Ok(Bytes::from(bytes))
    }
}
