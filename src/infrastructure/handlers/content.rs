//! Streams `content://` URIs through the host's content resolver.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::entities::{LoadedFrom, NetworkPolicy, Request};
use crate::domain::errors::LoadError;
use crate::domain::ports::{ContentResolver, LoadResult, RequestHandler};

const SCHEME_CONTENT: &str = "content";

/// Handles the `content` scheme.
pub struct ContentStreamRequestHandler {
    resolver: Option<Arc<dyn ContentResolver>>,
}

impl ContentStreamRequestHandler {
    #[must_use]
    pub fn new(resolver: Option<Arc<dyn ContentResolver>>) -> Self {
        Self { resolver }
    }
}

impl std::fmt::Debug for ContentStreamRequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStreamRequestHandler")
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

#[async_trait]
impl RequestHandler for ContentStreamRequestHandler {
    fn name(&self) -> &'static str {
        "content"
    }

    fn can_handle(&self, request: &Request) -> bool {
        request.locator().scheme() == Some(SCHEME_CONTENT)
    }

    async fn load(
        &self,
        request: &Request,
        _network_policy: NetworkPolicy,
    ) -> Result<LoadResult, LoadError> {
        let uri = request.uri().ok_or_else(|| LoadError::UnrecognizedRequest {
            request: request.to_string(),
        })?;
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| LoadError::not_found(format!("No content resolver for {uri}")))?;
        let bytes = resolver.open(uri).await?;
        Ok(LoadResult::stream(bytes, LoadedFrom::Disk))
    }
}
