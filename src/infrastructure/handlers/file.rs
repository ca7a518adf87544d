//! Reads `file://` URIs from the local filesystem.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::{LoadedFrom, NetworkPolicy, Request};
use crate::domain::errors::LoadError;
use crate::domain::ports::{LoadResult, RequestHandler};

const SCHEME_FILE: &str = "file";

/// Handles the `file` scheme.
#[derive(Debug, Default)]
pub struct FileRequestHandler;

#[async_trait]
impl RequestHandler for FileRequestHandler {
    fn name(&self) -> &'static str {
        "file"
    }

    fn can_handle(&self, request: &Request) -> bool {
        request.locator().scheme() == Some(SCHEME_FILE)
    }

    async fn load(
        &self,
        request: &Request,
        _network_policy: NetworkPolicy,
    ) -> Result<LoadResult, LoadError> {
        let path = request
            .uri()
            .and_then(|uri| uri.to_file_path().ok())
            .ok_or_else(|| LoadError::UnrecognizedRequest {
                request: request.to_string(),
            })?;
        let bytes = tokio::fs::read(&path).await?;
        Ok(LoadResult::stream(Bytes::from(bytes), LoadedFrom::Disk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ImageLocator;
    use crate::domain::ports::LoadPayload;
    use crate::infrastructure::handlers::png_bytes;
    use tempfile::TempDir;
    use url::Url;

    #[tokio::test]
    async fn test_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cat.png");
        let body = png_bytes(2, 2);
        std::fs::write(&path, &body).unwrap();

        let request = Request::builder(ImageLocator::Uri(Url::from_file_path(&path).unwrap()))
            .build()
            .unwrap();
        let result = FileRequestHandler
            .load(&request, NetworkPolicy::empty())
            .await
            .unwrap();

        assert_eq!(result.loaded_from(), LoadedFrom::Disk);
        assert!(matches!(result.payload(), LoadPayload::Stream(b) if *b == body));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.png");
        let request = Request::builder(ImageLocator::Uri(Url::from_file_path(&path).unwrap()))
            .build()
            .unwrap();

        let err = FileRequestHandler
            .load(&request, NetworkPolicy::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }));
        assert!(!err.is_transient());
    }
}
