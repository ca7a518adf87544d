//! Bounded worker pool ordered by priority, then submission sequence.
//!
//! The pool width is an atomic read before every dequeue, so resizing on a
//! connectivity change never drops queued or running work.

use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::domain::entities::{ConnectionType, MobileSubtype, NetworkInfo, Priority};
use crate::domain::errors::{LeverError, LeverResult};

/// Width used when no connectivity information is available.
pub const DEFAULT_THREAD_COUNT: usize = 3;

/// Unit of work runnable by the [`PriorityExecutor`].
#[async_trait]
pub trait PrioritizedJob: Send + Sync + 'static {
    /// Current priority; may rise while the job is queued.
    fn priority(&self) -> Priority;

    /// Submission sequence used as the FIFO tie-break.
    fn sequence(&self) -> u64;

    async fn run(self: Arc<Self>);
}

/// Whether the pipeline created its executor or was handed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorOwnership {
    /// Created by the pipeline: resized on connectivity changes and shut down
    /// with it.
    Owned,
    /// Supplied by the caller: never resized or shut down by the pipeline.
    Shared,
}

struct QueuedJob {
    priority: Priority,
    sequence: u64,
    job: Arc<dyn PrioritizedJob>,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first, then lower sequence (older) first
        match self.priority.cmp(&other.priority) {
            std::cmp::Ordering::Equal => other.sequence.cmp(&self.sequence),
            other_ordering => other_ordering,
        }
    }
}

struct Shared {
    queue: Mutex<BinaryHeap<QueuedJob>>,
    width: AtomicUsize,
    running: AtomicUsize,
    shutdown: AtomicBool,
    wake: Notify,
}

/// Decrements the running count even if the job panics.
struct RunningGuard(Arc<Shared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::AcqRel);
        self.0.wake.notify_one();
    }
}

/// Priority-ordered executor with a dynamically adjustable width.
pub struct PriorityExecutor {
    shared: Arc<Shared>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PriorityExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityExecutor")
            .field("width", &self.thread_count())
            .field("queued", &self.queued())
            .field("running", &self.running())
            .finish()
    }
}

impl PriorityExecutor {
    /// Creates an executor running at most `thread_count` jobs at once.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(thread_count: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            width: AtomicUsize::new(thread_count.max(1)),
            running: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            wake: Notify::new(),
        });
        let scheduler = tokio::spawn(Self::run_scheduler(shared.clone()));
        Self {
            shared,
            scheduler: Mutex::new(Some(scheduler)),
        }
    }

    async fn run_scheduler(shared: Arc<Shared>) {
        loop {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            while shared.running.load(Ordering::Acquire) < shared.width.load(Ordering::Acquire) {
                let Some(queued) = shared.queue.lock().pop() else {
                    break;
                };
                shared.running.fetch_add(1, Ordering::AcqRel);
                trace!(
                    sequence = queued.sequence,
                    priority = %queued.priority,
                    "Dequeued job"
                );
                let guard = RunningGuard(shared.clone());
                tokio::spawn(async move {
                    let _guard = guard;
                    queued.job.run().await;
                });
            }
            shared.wake.notified().await;
        }
        debug!("Executor scheduler stopped");
    }

    /// Queues a job.
    ///
    /// # Errors
    /// Returns [`LeverError::Shutdown`] once the executor has been shut down.
    pub fn submit(&self, job: Arc<dyn PrioritizedJob>) -> LeverResult<()> {
        if self.is_shutdown() {
            return Err(LeverError::Shutdown);
        }
        let queued = QueuedJob {
            priority: job.priority(),
            sequence: job.sequence(),
            job,
        };
        self.shared.queue.lock().push(queued);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Rebuilds the queue order from each job's current priority.
    pub fn reprioritize(&self) {
        let mut queue = self.shared.queue.lock();
        let rebuilt: BinaryHeap<QueuedJob> = queue
            .drain()
            .map(|queued| QueuedJob {
                priority: queued.job.priority(),
                sequence: queued.sequence,
                job: queued.job,
            })
            .collect();
        *queue = rebuilt;
    }

    /// Removes a still-queued job. Returns whether it was found.
    pub fn cancel(&self, sequence: u64) -> bool {
        let mut queue = self.shared.queue.lock();
        let before = queue.len();
        queue.retain(|queued| queued.sequence != sequence);
        before != queue.len()
    }

    /// Changes the maximum number of concurrently running jobs.
    pub fn set_thread_count(&self, thread_count: usize) {
        let thread_count = thread_count.max(1);
        let previous = self.shared.width.swap(thread_count, Ordering::AcqRel);
        if previous != thread_count {
            debug!(from = previous, to = thread_count, "Executor width changed");
        }
        self.shared.wake.notify_one();
    }

    /// Sizes the pool for the current connectivity.
    pub fn adjust_thread_count(&self, info: Option<&NetworkInfo>) {
        self.set_thread_count(thread_count_for(info));
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.shared.width.load(Ordering::Acquire)
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Number of jobs currently running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stops dequeuing and drops queued work. Running jobs finish normally.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut queue = self.shared.queue.lock();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        self.shared.wake.notify_one();
        self.scheduler.lock().take();
        debug!(dropped, "Executor shut down");
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for PriorityExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pool width for a connectivity snapshot.
#[must_use]
pub fn thread_count_for(info: Option<&NetworkInfo>) -> usize {
    let Some(info) = info.filter(|info| info.is_connected()) else {
        return DEFAULT_THREAD_COUNT;
    };
    match info.connection_type {
        ConnectionType::Wifi | ConnectionType::Wimax | ConnectionType::Ethernet => 4,
        ConnectionType::Mobile => match info.subtype {
            Some(MobileSubtype::Lte | MobileSubtype::Hspap | MobileSubtype::Ehrpd) => 3,
            Some(
                MobileSubtype::Umts
                | MobileSubtype::Cdma
                | MobileSubtype::Evdo0
                | MobileSubtype::EvdoA
                | MobileSubtype::EvdoB,
            ) => 2,
            Some(MobileSubtype::Gprs | MobileSubtype::Edge) => 1,
            Some(MobileSubtype::Unknown) | None => DEFAULT_THREAD_COUNT,
        },
        ConnectionType::Other => DEFAULT_THREAD_COUNT,
    }
}
