//! Built-in request handlers, ordered from most to least specific.

mod asset;
mod content;
mod file;
mod memory;
mod network;
mod resource;

pub use asset::{ANDROID_ASSET, AssetRequestHandler, DirectoryAssetResolver};
pub use content::ContentStreamRequestHandler;
pub use file::FileRequestHandler;
pub use memory::BytesRequestHandler;
pub use network::NetworkRequestHandler;
pub use resource::{ResourceRequestHandler, SCHEME_ANDROID_RESOURCE};

use bytes::Bytes;

use crate::domain::entities::Bitmap;
use crate::domain::errors::LoadError;

/// Decodes encoded image bytes on the blocking pool.
///
/// # Errors
/// Returns a decode error for unsupported data, or an I/O error if the
/// decode task panicked.
pub async fn decode_bytes(bytes: Bytes) -> Result<Bitmap, LoadError> {
    tokio::task::spawn_blocking(move || Bitmap::decode(&bytes))
        .await
        .map_err(|e| LoadError::io(format!("Decode task panicked: {e}")))?
        .map_err(LoadError::from)
}

#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32) -> Bytes {
    let bitmap = Bitmap::new(image::DynamicImage::new_rgba8(width, height));
    Bytes::from(bitmap.encode_png().unwrap())
}
