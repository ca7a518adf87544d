//! In-memory LRU bitmap cache bounded by byte size.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{Bitmap, KEY_SEPARATOR};
use crate::domain::ports::Cache;

/// Bytes in one mebibyte.
const MIB: usize = 1024 * 1024;

/// Memory class assumed when the host does not report one.
pub const DEFAULT_MEMORY_CLASS_MB: usize = 256;

/// Default cache size: roughly 15% of the available heap.
#[must_use]
pub const fn calculate_memory_cache_size(memory_class_mb: usize) -> usize {
    memory_class_mb * MIB / 7
}

struct Entries {
    map: LruCache<String, Bitmap>,
    size: usize,
}

/// LRU cache of decoded bitmaps, evicting least recently used entries once
/// the total byte size would exceed the maximum.
pub struct LruMemoryCache {
    entries: Mutex<Entries>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
}

impl LruMemoryCache {
    /// Creates a cache holding at most `max_size` bytes.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: LruCache::unbounded(),
                size: 0,
            }),
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a cache sized from the host memory class in megabytes.
    #[must_use]
    pub fn with_memory_class(memory_class_mb: usize) -> Self {
        Self::new(calculate_memory_cache_size(memory_class_mb))
    }

    /// Returns hit, miss, put and eviction counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
            len: self.len(),
        }
    }

    /// Number of cached bitmaps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn trim_to_size(&self, entries: &mut Entries, max_size: usize) {
        while entries.size > max_size {
            let Some((key, bitmap)) = entries.map.pop_lru() else {
                break;
            };
            entries.size = entries.size.saturating_sub(bitmap.byte_count());
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key.escape_debug(), "Evicted bitmap from memory cache");
        }
    }
}

impl Default for LruMemoryCache {
    fn default() -> Self {
        Self::with_memory_class(DEFAULT_MEMORY_CLASS_MB)
    }
}

impl Cache for LruMemoryCache {
    fn get(&self, key: &str) -> Option<Bitmap> {
        let mut entries = self.entries.lock();
        if let Some(bitmap) = entries.map.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(bitmap.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    fn set(&self, key: &str, bitmap: Bitmap) {
        let added = bitmap.byte_count();
        let mut entries = self.entries.lock();

        if added > self.max_size {
            if let Some(previous) = entries.map.pop(key) {
                entries.size = entries.size.saturating_sub(previous.byte_count());
            }
            debug!(
                key = %key.escape_debug(),
                bytes = added,
                max = self.max_size,
                "Bitmap larger than memory cache, not stored"
            );
            return;
        }

        self.puts.fetch_add(1, Ordering::Relaxed);
        entries.size += added;
        if let Some(previous) = entries.map.put(key.to_string(), bitmap) {
            entries.size = entries.size.saturating_sub(previous.byte_count());
        }
        self.trim_to_size(&mut entries, self.max_size);
    }

    fn size(&self) -> usize {
        self.entries.lock().size
    }

    fn max_size(&self) -> usize {
        self.max_size
    }

    fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.map.clear();
        entries.size = 0;
        debug!("Cleared memory cache");
    }

    fn clear_key_prefix(&self, prefix: &str) {
        let mut entries = self.entries.lock();
        let matching: Vec<String> = entries
            .map
            .iter()
            .filter(|(key, _)| {
                key.strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with(KEY_SEPARATOR))
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matching {
            if let Some(bitmap) = entries.map.pop(key) {
                entries.size = entries.size.saturating_sub(bitmap.byte_count());
            }
        }
        debug!(prefix, removed = matching.len(), "Invalidated memory cache entries");
    }
}

/// Cache that never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl Cache for NoCache {
    fn get(&self, _key: &str) -> Option<Bitmap> {
        None
    }

    fn set(&self, _key: &str, _bitmap: Bitmap) {}

    fn size(&self) -> usize {
        0
    }

    fn max_size(&self) -> usize {
        0
    }

    fn clear(&self) {}

    fn clear_key_prefix(&self, _prefix: &str) {}
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of stored bitmaps.
    pub puts: u64,
    /// Number of bitmaps evicted to stay under the size limit.
    pub evictions: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached bitmaps.
    pub len: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} bitmaps, {:.1}% hit rate ({} hits, {} misses, {} puts, {} evictions)",
            self.len, self.hit_rate, self.hits, self.misses, self.puts, self.evictions
        )
    }
}
