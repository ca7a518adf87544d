//! Port for custom bitmap transformations.

use crate::domain::entities::Bitmap;

/// A custom transformation applied after decoding and built-in transforms.
pub trait Transformation: Send + Sync {
    /// Produces a transformed bitmap. Returning `source` unchanged is allowed.
    fn transform(&self, source: Bitmap) -> Bitmap;

    /// Unique key for caching purposes; every parameter that affects the
    /// output must be part of it.
    fn key(&self) -> String;
}
