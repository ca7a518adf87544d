//! Infrastructure layer with adapters for caches, I/O and scheduling.

/// Memory and disk caches.
pub mod cache;
/// Pipeline configuration.
pub mod config;
/// Priority executor.
pub mod executor;
/// Built-in request handlers.
pub mod handlers;
/// HTTP downloader.
pub mod http;
/// Pipeline statistics.
pub mod stats;

pub use cache::{DiskCache, LruMemoryCache, NoCache};
pub use config::{CliArgs, ConfigError, ConfigStore, LeverConfig, LogLevel};
pub use executor::{ExecutorOwnership, PrioritizedJob, PriorityExecutor};
pub use http::HttpDownloader;
pub use stats::{Stats, StatsSnapshot};
