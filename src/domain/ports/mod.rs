//! Traits at the seams between the pipeline and its collaborators.

mod cache_port;
mod downloader_port;
mod listener_port;
mod request_handler_port;
mod resolver_port;
mod target_port;
mod transformation_port;

pub use cache_port::Cache;
pub use downloader_port::{CacheControl, DownloadRequest, DownloadResponse, Downloader};
pub use listener_port::{Listener, RequestTransformer};
pub use request_handler_port::{LoadPayload, LoadResult, RequestHandler};
pub use resolver_port::{AssetResolver, ContentResolver, ResourceResolver};
pub use target_port::{Callback, RemoteTarget, Target};
pub use transformation_port::Transformation;
