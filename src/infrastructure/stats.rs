//! Fire-and-forget pipeline counters.
//!
//! Events are sent over an unbounded channel and folded into totals by a
//! background task, so recording never blocks the caller.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::domain::ports::Cache;

#[derive(Debug)]
enum StatsEvent {
    CacheHit,
    CacheMiss,
    BitmapDecoded(usize),
    BitmapTransformed(usize),
    DownloadFinished(u64),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    cache_hits: u64,
    cache_misses: u64,
    total_download_size: u64,
    total_original_bitmap_size: u64,
    total_transformed_bitmap_size: u64,
    download_count: u64,
    original_bitmap_count: u64,
    transformed_bitmap_count: u64,
}

impl Counters {
    fn apply(&mut self, event: &StatsEvent) {
        match event {
            StatsEvent::CacheHit => self.cache_hits += 1,
            StatsEvent::CacheMiss => self.cache_misses += 1,
            StatsEvent::BitmapDecoded(bytes) => {
                self.original_bitmap_count += 1;
                self.total_original_bitmap_size += *bytes as u64;
            }
            StatsEvent::BitmapTransformed(bytes) => {
                self.transformed_bitmap_count += 1;
                self.total_transformed_bitmap_size += *bytes as u64;
            }
            StatsEvent::DownloadFinished(bytes) => {
                self.download_count += 1;
                self.total_download_size += bytes;
            }
            StatsEvent::Flush(_) => {}
        }
    }
}

/// Collects pipeline statistics in the background.
pub struct Stats {
    tx: mpsc::UnboundedSender<StatsEvent>,
    counters: Arc<Mutex<Counters>>,
    cache: Arc<dyn Cache>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stats")
            .field("counters", &*self.counters.lock())
            .finish_non_exhaustive()
    }
}

impl Stats {
    /// Starts the collector. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StatsEvent>();
        let counters = Arc::new(Mutex::new(Counters::default()));
        let sink = counters.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let StatsEvent::Flush(ack) = event {
                    let _ = ack.send(());
                    continue;
                }
                trace!(?event, "Stats event");
                sink.lock().apply(&event);
            }
        });
        Self {
            tx,
            counters,
            cache,
            task: Mutex::new(Some(task)),
        }
    }

    fn send(&self, event: StatsEvent) {
        // Dropped silently after shutdown.
        let _ = self.tx.send(event);
    }

    pub fn dispatch_cache_hit(&self) {
        self.send(StatsEvent::CacheHit);
    }

    pub fn dispatch_cache_miss(&self) {
        self.send(StatsEvent::CacheMiss);
    }

    pub fn dispatch_bitmap_decoded(&self, bytes: usize) {
        self.send(StatsEvent::BitmapDecoded(bytes));
    }

    pub fn dispatch_bitmap_transformed(&self, bytes: usize) {
        self.send(StatsEvent::BitmapTransformed(bytes));
    }

    pub fn dispatch_download_finished(&self, bytes: u64) {
        self.send(StatsEvent::DownloadFinished(bytes));
    }

    /// Waits until every event sent before this call has been applied.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(StatsEvent::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Current totals plus memory-cache occupancy.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = *self.counters.lock();
        StatsSnapshot {
            max_size: self.cache.max_size(),
            size: self.cache.size(),
            cache_hits: counters.cache_hits,
            cache_misses: counters.cache_misses,
            total_download_size: counters.total_download_size,
            total_original_bitmap_size: counters.total_original_bitmap_size,
            total_transformed_bitmap_size: counters.total_transformed_bitmap_size,
            average_download_size: average(counters.download_count, counters.total_download_size),
            average_original_bitmap_size: average(
                counters.original_bitmap_count,
                counters.total_original_bitmap_size,
            ),
            average_transformed_bitmap_size: average(
                counters.transformed_bitmap_count,
                counters.total_transformed_bitmap_size,
            ),
            download_count: counters.download_count,
            original_bitmap_count: counters.original_bitmap_count,
            transformed_bitmap_count: counters.transformed_bitmap_count,
            time_stamp: SystemTime::now(),
        }
    }

    /// Stops the collector; later events are dropped.
    pub fn shutdown(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

const fn average(count: u64, total: u64) -> u64 {
    if count == 0 { 0 } else { total / count }
}

/// Point-in-time copy of the pipeline statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct StatsSnapshot {
    pub max_size: usize,
    pub size: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_download_size: u64,
    pub total_original_bitmap_size: u64,
    pub total_transformed_bitmap_size: u64,
    pub average_download_size: u64,
    pub average_original_bitmap_size: u64,
    pub average_transformed_bitmap_size: u64,
    pub download_count: u64,
    pub original_bitmap_count: u64,
    pub transformed_bitmap_count: u64,
    pub time_stamp: SystemTime,
}

impl std::fmt::Display for StatsSnapshot {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let percent = if self.max_size == 0 {
            0.0
        } else {
            self.size as f64 / self.max_size as f64 * 100.0
        };
        writeln!(f, "===============BEGIN LEVER STATS ===============")?;
        writeln!(f, "Memory Cache Stats")?;
        writeln!(f, "  Max Cache Size: {}B", self.max_size)?;
        writeln!(f, "  Cache Size: {}B", self.size)?;
        writeln!(f, "  Cache % Full: {percent:.0}")?;
        writeln!(f, "  Cache Hits: {}", self.cache_hits)?;
        writeln!(f, "  Cache Misses: {}", self.cache_misses)?;
        writeln!(f, "Network Stats")?;
        writeln!(f, "  Download Count: {}", self.download_count)?;
        writeln!(f, "  Total Download Size: {}B", self.total_download_size)?;
        writeln!(f, "  Average Download Size: {}B", self.average_download_size)?;
        writeln!(f, "Bitmap Stats")?;
        writeln!(f, "  Total Bitmaps Decoded: {}", self.original_bitmap_count)?;
        writeln!(f, "  Total Bitmap Size: {}B", self.total_original_bitmap_size)?;
        writeln!(f, "  Total Transformed Bitmaps: {}", self.transformed_bitmap_count)?;
        writeln!(
            f,
            "  Total Transformed Bitmap Size: {}B",
            self.total_transformed_bitmap_size
        )?;
        writeln!(f, "  Average Bitmap Size: {}B", self.average_original_bitmap_size)?;
        writeln!(
            f,
            "  Average Transformed Bitmap Size: {}B",
            self.average_transformed_bitmap_size
        )?;
        write!(f, "===============END LEVER STATS ===============")
    }
}
