use std::path::PathBuf;

use clap::Parser;

use super::app_config::LogLevel;
use crate::domain::entities::Priority;

#[derive(Debug, Parser)]
#[command(
    name = "lever",
    version,
    about = "Fetch images through the lever loading pipeline",
    long_about = None
)]
pub struct CliArgs {
    /// Image URIs or paths to fetch.
    #[arg(value_name = "URI", required = true)]
    pub uris: Vec<String>,

    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Memory cache size in bytes.
    #[arg(long, value_name = "BYTES")]
    pub memory_cache_size: Option<usize>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH")]
    pub disk_cache_dir: Option<PathBuf>,

    /// Initial number of concurrent loads.
    #[arg(long)]
    pub thread_count: Option<usize>,

    /// Delay before retrying a failed load, in milliseconds.
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// HTTP request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Log request lifecycle events at debug level.
    #[arg(long)]
    pub logging_enabled: Option<bool>,

    /// Skip the memory cache lookup and store.
    #[arg(long)]
    pub no_memory_cache: bool,

    /// Serve only from the disk cache.
    #[arg(long, conflicts_with = "no_disk_cache")]
    pub offline: bool,

    /// Skip the disk cache lookup and store.
    #[arg(long)]
    pub no_disk_cache: bool,

    /// Scheduling priority (low, normal, high).
    #[arg(long)]
    pub priority: Option<Priority>,

    /// Resize to WIDTHxHEIGHT; one side may be 0 to keep the aspect ratio.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub resize: Option<(u32, u32)>,
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value}"))?;
    let width = width.trim().parse().map_err(|e| format!("invalid width: {e}"))?;
    let height = height.trim().parse().map_err(|e| format!("invalid height: {e}"))?;
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "lever",
            "--offline",
            "--priority",
            "high",
            "--resize",
            "64x0",
            "a.png",
            "b.png",
        ]);
        assert!(args.offline);
        assert_eq!(args.priority, Some(Priority::High));
        assert_eq!(args.resize, Some((64, 0)));
        assert_eq!(args.uris, vec!["a.png", "b.png"]);
    }

    #[test]
    fn test_offline_conflicts_with_no_disk_cache() {
        let result = CliArgs::try_parse_from(["lever", "--offline", "--no-disk-cache", "a.png"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("64").is_err());
        assert!(parse_size("ax2").is_err());
    }
}
