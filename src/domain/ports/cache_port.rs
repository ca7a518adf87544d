//! Port definition for the in-memory bitmap cache.

use crate::domain::entities::Bitmap;

/// Synchronous memory cache keyed by cache key.
///
/// Reads must be cheap and non-blocking so callers can check the cache before
/// dispatching any work. Implementations must be thread-safe.
pub trait Cache: Send + Sync {
    /// Returns the bitmap stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Bitmap>;

    /// Stores a bitmap under `key`.
    fn set(&self, key: &str, bitmap: Bitmap);

    /// Current total size in bytes.
    fn size(&self) -> usize;

    /// Maximum total size in bytes.
    fn max_size(&self) -> usize;

    /// Removes every entry.
    fn clear(&self);

    /// Removes every entry whose key starts with `prefix` immediately
    /// followed by the key separator.
    fn clear_key_prefix(&self, prefix: &str);
}
