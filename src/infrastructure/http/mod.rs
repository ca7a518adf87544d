//! HTTP download adapter.

mod downloader;

pub use downloader::{DEFAULT_TIMEOUT_SECS, HttpDownloader};
