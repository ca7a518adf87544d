//! Memory and disk caches.

mod disk_cache;
mod memory_cache;

pub use disk_cache::{DEFAULT_DISK_CACHE_SIZE, DiskCache, default_cache_dir};
pub use memory_cache::{
    CacheStats, DEFAULT_MEMORY_CLASS_MB, LruMemoryCache, NoCache, calculate_memory_cache_size,
};
