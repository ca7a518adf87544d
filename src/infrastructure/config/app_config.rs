//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use crate::infrastructure::cache::{
    DEFAULT_DISK_CACHE_SIZE, DEFAULT_MEMORY_CLASS_MB, calculate_memory_cache_size,
};
use crate::infrastructure::executor::DEFAULT_THREAD_COUNT;
use crate::infrastructure::http::DEFAULT_TIMEOUT_SECS;

const APP_NAME: &str = "lever";
const APP_QUALIFIER: &str = "dev";
const APP_ORGANIZATION: &str = "lever";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Settings for building a [`Lever`](crate::application::Lever).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeverConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Memory cache size in bytes. Derived from `memory_class_mb` when absent.
    #[serde(default)]
    pub memory_cache_size: Option<usize>,

    /// Heap budget of the host in megabytes.
    #[serde(default = "default_memory_class_mb")]
    pub memory_class_mb: usize,

    /// Disk cache size in bytes.
    #[serde(default = "default_disk_cache_size")]
    pub disk_cache_size: u64,

    /// Disk cache directory. Platform cache directory when absent.
    #[serde(default)]
    pub disk_cache_dir: Option<PathBuf>,

    /// Initial executor width.
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,

    /// Delay before a failed hunt is retried, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Logs request lifecycle events at debug instead of trace.
    #[serde(default)]
    pub logging_enabled: bool,

    /// Resize the pool and replay failed requests on connectivity changes.
    #[serde(default = "default_true")]
    pub scans_network_changes: bool,
}

const fn default_memory_class_mb() -> usize {
    DEFAULT_MEMORY_CLASS_MB
}

const fn default_disk_cache_size() -> u64 {
    DEFAULT_DISK_CACHE_SIZE
}

const fn default_thread_count() -> usize {
    DEFAULT_THREAD_COUNT
}

const fn default_retry_delay_ms() -> u64 {
    500
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_true() -> bool {
    true
}

impl LeverConfig {
    /// Merges CLI overrides into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(memory_cache_size) = args.memory_cache_size {
            self.memory_cache_size = Some(memory_cache_size);
        }
        if let Some(disk_cache_dir) = &args.disk_cache_dir {
            self.disk_cache_dir = Some(disk_cache_dir.clone());
        }
        if let Some(thread_count) = args.thread_count {
            self.thread_count = thread_count;
        }
        if let Some(retry_delay_ms) = args.retry_delay_ms {
            self.retry_delay_ms = retry_delay_ms;
        }
        if let Some(timeout_secs) = args.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        if let Some(logging_enabled) = args.logging_enabled {
            self.logging_enabled = logging_enabled;
        }
    }

    /// Memory cache size in bytes.
    #[must_use]
    pub fn effective_memory_cache_size(&self) -> usize {
        self.memory_cache_size
            .unwrap_or_else(|| calculate_memory_cache_size(self.memory_class_mb))
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("lever.log"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}

impl Default for LeverConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            memory_cache_size: None,
            memory_class_mb: DEFAULT_MEMORY_CLASS_MB,
            disk_cache_size: DEFAULT_DISK_CACHE_SIZE,
            disk_cache_dir: None,
            thread_count: DEFAULT_THREAD_COUNT,
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            logging_enabled: false,
            scans_network_changes: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
            log_level = "debug"
            memory_class_mb = 70
            retry_delay_ms = 250
            scans_network_changes = false
        "#;

        let config: LeverConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.effective_memory_cache_size(), 10 * 1024 * 1024);
        assert_eq!(config.retry_delay(), Duration::from_millis(250));
        assert!(!config.scans_network_changes);
        assert_eq!(config.thread_count, DEFAULT_THREAD_COUNT);
        assert_eq!(config.disk_cache_size, DEFAULT_DISK_CACHE_SIZE);
    }

    #[test]
    fn test_default_config() {
        let config = LeverConfig::default();

        assert_eq!(config.memory_class_mb, 256);
        assert_eq!(config.retry_delay_ms, 500);
        assert_eq!(config.timeout_secs, 30);
        assert!(config.scans_network_changes);
        assert!(!config.logging_enabled);
    }

    #[test]
    fn test_explicit_memory_cache_size_wins() {
        let config = LeverConfig {
            memory_cache_size: Some(4096),
            ..LeverConfig::default()
        };
        assert_eq!(config.effective_memory_cache_size(), 4096);
    }

    #[test]
    fn test_merge_with_args() {
        let args = CliArgs::parse_from([
            "lever",
            "--thread-count",
            "1",
            "--log-level",
            "trace",
            "--logging-enabled",
            "true",
            "https://example.com/a.png",
        ]);
        let mut config = LeverConfig::default();
        config.merge_with_args(&args);

        assert_eq!(config.thread_count, 1);
        assert_eq!(config.log_level, LogLevel::Trace);
        assert!(config.logging_enabled);
        assert_eq!(config.retry_delay_ms, 500);
    }
}
