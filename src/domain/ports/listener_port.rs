//! Observer hooks on the pipeline.

use url::Url;

use crate::domain::entities::Request;
use crate::domain::errors::LoadError;

/// Told about every terminal load failure.
pub trait Listener: Send + Sync {
    fn on_image_load_failed(&self, uri: Option<&Url>, error: &LoadError);
}

/// Rewrites requests before their cache key is derived, e.g. to route
/// through a CDN. The pipeline copies the original id and start time onto
/// the returned request.
pub trait RequestTransformer: Send + Sync {
    fn transform_request(&self, request: Request) -> Request;
}
