//! Loads bundled resources by id or `android.resource://` URI.

use std::sync::Arc;

use async_trait::async_trait;

use super::decode_bytes;
use crate::domain::entities::{ImageLocator, LoadedFrom, NetworkPolicy, Request};
use crate::domain::errors::LoadError;
use crate::domain::ports::{LoadResult, RequestHandler, ResourceResolver};

pub const SCHEME_ANDROID_RESOURCE: &str = "android.resource";

/// Handles resource ids and the `android.resource` scheme.
pub struct ResourceRequestHandler {
    resolver: Option<Arc<dyn ResourceResolver>>,
}

impl ResourceRequestHandler {
    #[must_use]
    pub fn new(resolver: Option<Arc<dyn ResourceResolver>>) -> Self {
        Self { resolver }
    }

    fn resource_id(&self, request: &Request) -> Result<u32, LoadError> {
        if let Some(id) = request.locator().resource_id() {
            return Ok(id);
        }
        let uri = request.uri().ok_or_else(|| LoadError::UnrecognizedRequest {
            request: request.to_string(),
        })?;
        let package = uri.host_str().unwrap_or_default();
        let segments: Vec<&str> = uri
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            [id] => id
                .parse()
                .map_err(|_| LoadError::not_found(format!("Last path segment is not a resource ID: {uri}"))),
            [kind, name] => self
                .resolver
                .as_ref()
                .and_then(|resolver| resolver.identifier(package, kind, name))
                .ok_or_else(|| LoadError::not_found(format!("No resource named {kind}/{name} in {package}"))),
            _ => Err(LoadError::not_found(format!("More than two path segments: {uri}"))),
        }
    }
}

impl std::fmt::Debug for ResourceRequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRequestHandler")
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

#[async_trait]
impl RequestHandler for ResourceRequestHandler {
    fn name(&self) -> &'static str {
        "resource"
    }

    fn can_handle(&self, request: &Request) -> bool {
        match request.locator() {
            ImageLocator::Resource(_) => true,
            ImageLocator::Uri(uri) => uri.scheme() == SCHEME_ANDROID_RESOURCE,
            ImageLocator::Bytes(_) => false,
        }
    }

    async fn load(
        &self,
        request: &Request,
        _network_policy: NetworkPolicy,
    ) -> Result<LoadResult, LoadError> {
        let id = self.resource_id(request)?;
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| LoadError::not_found(format!("No resource resolver for {id}")))?;
        let bytes = resolver.open(id).await?;
        let bitmap = decode_bytes(bytes).await?;
        Ok(LoadResult::bitmap(bitmap, LoadedFrom::Disk))
    }
}
