//! Size-bounded directory of downloaded image bodies, keyed by URL.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};
use url::Url;

use crate::domain::errors::LoadError;

/// Default disk cache size in bytes (50 MB).
pub const DEFAULT_DISK_CACHE_SIZE: u64 = 50 * 1024 * 1024;

const ENTRY_EXTENSION: &str = "img";

/// Disk cache for raw HTTP response bodies.
///
/// When the total size exceeds the limit, the least recently accessed files
/// are removed until the cache is back at 90% of its capacity.
pub struct DiskCache {
    cache_dir: PathBuf,
    max_size: u64,
    current_size: AtomicU64,
    item_count: AtomicUsize,
}

impl DiskCache {
    /// Opens (creating if needed) a disk cache in `cache_dir`.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created or listed.
    pub async fn new(cache_dir: PathBuf, max_size: u64) -> Result<Self, LoadError> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| LoadError::io(format!("Failed to create cache dir: {e}")))?;

        let mut total_size = 0u64;
        let mut count = 0usize;
        let mut entries = fs::read_dir(&cache_dir)
            .await
            .map_err(|e| LoadError::io(format!("Failed to read cache dir: {e}")))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if is_entry(&entry.path())
                && let Ok(meta) = entry.metadata().await
            {
                total_size += meta.len();
                count += 1;
            }
        }

        let cache = Self {
            cache_dir,
            max_size,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
        };
        cache.cleanup_if_needed().await;
        debug!(
            dir = %cache.cache_dir.display(),
            entries = count,
            size = total_size,
            "Opened disk cache"
        );
        Ok(cache)
    }

    /// Opens a cache in the platform cache directory.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created.
    pub async fn default_location(max_size: u64) -> Result<Self, LoadError> {
        Self::new(default_cache_dir(), max_size).await
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, url: &Url) -> PathBuf {
        let hash = Sha256::digest(url.as_str().as_bytes());
        self.cache_dir
            .join(format!("{}.{ENTRY_EXTENSION}", hex::encode(&hash[..16])))
    }

    /// Returns the cached body for `url`, if present.
    pub async fn get(&self, url: &Url) -> Option<Bytes> {
        let path = self.cache_path(url);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(url = %url, path = %path.display(), "Disk cache hit");
                Some(Bytes::from(bytes))
            }
            Err(_) => {
                trace!(url = %url, "Disk cache miss");
                None
            }
        }
    }

    /// Stores the body for `url`.
    ///
    /// # Errors
    /// Returns error if the file cannot be created or written.
    pub async fn put(&self, url: &Url, bytes: &[u8]) -> Result<(), LoadError> {
        let path = self.cache_path(url);
        let old_size = fs::metadata(&path).await.map(|m| m.len()).ok();

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| LoadError::io(format!("Failed to create cache file: {e}")))?;
        file.write_all(bytes)
            .await
            .map_err(|e| LoadError::io(format!("Failed to write cache file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| LoadError::io(format!("Failed to flush cache file: {e}")))?;

        let new_size = bytes.len() as u64;
        if let Some(old) = old_size {
            if new_size > old {
                self.current_size.fetch_add(new_size - old, Ordering::Relaxed);
            } else {
                self.current_size.fetch_sub(old - new_size, Ordering::Relaxed);
            }
        } else {
            self.current_size.fetch_add(new_size, Ordering::Relaxed);
            self.item_count.fetch_add(1, Ordering::Relaxed);
        }
        debug!(url = %url, size = bytes.len(), "Stored response in disk cache");

        self.cleanup_if_needed().await;
        Ok(())
    }

    /// Removes the entry for `url`.
    pub async fn evict(&self, url: &Url) {
        let path = self.cache_path(url);
        let size = fs::metadata(&path).await.map(|m| m.len()).ok();
        match fs::remove_file(&path).await {
            Ok(()) => {
                if let Some(size) = size {
                    self.current_size.fetch_sub(size, Ordering::Relaxed);
                    self.item_count.fetch_sub(1, Ordering::Relaxed);
                }
                debug!(url = %url, "Evicted from disk cache");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(url = %url, error = %e, "Failed to evict from disk cache"),
        }
    }

    /// Removes every entry.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be read.
    pub async fn clear(&self) -> Result<(), LoadError> {
        let mut entries = fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| LoadError::io(format!("Failed to read cache dir: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LoadError::io(format!("Failed to read entry: {e}")))?
        {
            let path = entry.path();
            if is_entry(&path) && fs::remove_file(&path).await.is_err() {
                warn!(path = %path.display(), "Failed to remove cache file");
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Current size in bytes.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Number of cached bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn contains(&self, url: &Url) -> bool {
        fs::try_exists(self.cache_path(url)).await.unwrap_or(false)
    }

    async fn cleanup_if_needed(&self) {
        let current_size = self.current_size();
        if current_size <= self.max_size {
            return;
        }
        debug!(
            current_size,
            max_size = self.max_size,
            "Disk cache over limit, cleaning up"
        );

        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return;
        };
        let mut files: Vec<(PathBuf, std::time::SystemTime, u64)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !is_entry(&path) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                let accessed = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                files.push((path, accessed, meta.len()));
            }
        }
        files.sort_by_key(|(_, time, _)| *time);

        let target = current_size - self.max_size + (self.max_size / 10);
        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        for (path, _, size) in files {
            if freed_size >= target {
                break;
            }
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
            } else {
                freed_size += size;
                freed_count += 1;
            }
        }
        self.current_size.fetch_sub(freed_size, Ordering::Relaxed);
        self.item_count.fetch_sub(freed_count, Ordering::Relaxed);
        debug!(freed_size, freed_count, "Disk cache cleanup complete");
    }
}

fn is_entry(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "lever", "lever").map_or_else(
        || std::env::temp_dir().join("lever").join("cache").join("http"),
        |dirs| dirs.cache_dir().join("http"),
    )
}
