//! Serves encoded images the caller already holds in memory.

use async_trait::async_trait;

use crate::domain::entities::{ImageLocator, LoadedFrom, NetworkPolicy, Request};
use crate::domain::errors::LoadError;
use crate::domain::ports::{LoadResult, RequestHandler};

/// Handles [`ImageLocator::Bytes`] requests.
#[derive(Debug, Default)]
pub struct BytesRequestHandler;

#[async_trait]
impl RequestHandler for BytesRequestHandler {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(request.locator(), ImageLocator::Bytes(_))
    }

    async fn load(
        &self,
        request: &Request,
        _network_policy: NetworkPolicy,
    ) -> Result<LoadResult, LoadError> {
        match request.locator() {
            ImageLocator::Bytes(bytes) => Ok(LoadResult::stream(bytes.clone(), LoadedFrom::Memory)),
            _ => Err(LoadError::UnrecognizedRequest {
                request: request.to_string(),
            }),
        }
    }
}
