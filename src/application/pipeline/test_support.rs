//! Fakes shared by the pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::action::ActionParams;
use crate::domain::entities::{
    Bitmap, ImageLocator, LoadedFrom, MemoryPolicy, NetworkInfo, NetworkPolicy, Request,
};
use crate::domain::errors::LoadError;
use crate::domain::ports::{Callback, LoadResult, RemoteTarget, RequestHandler, Target};

/// Scheme claimed by [`FakeHandler`].
pub(crate) const FAKE_SCHEME: &str = "fake";

/// Handler producing 4x4 bitmaps after an optional delay, optionally failing
/// with scripted errors first.
pub(crate) struct FakeHandler {
    loads: AtomicUsize,
    failures: Mutex<VecDeque<LoadError>>,
    policies: Mutex<Vec<NetworkPolicy>>,
    paths: Mutex<Vec<String>>,
    panics: AtomicUsize,
    retry_count: u32,
    replay: bool,
    streaming: bool,
    delay: Duration,
}

impl FakeHandler {
    pub(crate) fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            policies: Mutex::new(Vec::new()),
            paths: Mutex::new(Vec::new()),
            panics: AtomicUsize::new(0),
            retry_count: 0,
            replay: false,
            streaming: false,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn failing_with(self, errors: Vec<LoadError>) -> Self {
        *self.failures.lock() = errors.into();
        self
    }

    /// Panic inside `load` for the first `count` calls.
    pub(crate) fn panicking(self, count: usize) -> Self {
        self.panics.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub(crate) fn with_replay(mut self) -> Self {
        self.replay = true;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Return PNG bytes from disk instead of a decoded bitmap.
    pub(crate) fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn policies(&self) -> Vec<NetworkPolicy> {
        self.policies.lock().clone()
    }

    /// URI paths in the order they were loaded.
    pub(crate) fn paths(&self) -> Vec<String> {
        self.paths.lock().clone()
    }
}

#[async_trait]
impl RequestHandler for FakeHandler {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn can_handle(&self, request: &Request) -> bool {
        request.locator().scheme() == Some(FAKE_SCHEME)
    }

    async fn load(
        &self,
        request: &Request,
        network_policy: NetworkPolicy,
    ) -> Result<LoadResult, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.policies.lock().push(network_policy);
        self.paths
            .lock()
            .push(request.uri().map_or_else(String::new, |uri| uri.path().to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self
            .panics
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("fake handler exploded");
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        if self.streaming {
            return Ok(LoadResult::stream(
                crate::infrastructure::handlers::png_bytes(4, 4),
                LoadedFrom::Disk,
            ));
        }
        Ok(LoadResult::bitmap(
            Bitmap::new(image::DynamicImage::new_rgba8(4, 4)),
            LoadedFrom::Network,
        ))
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn should_retry(&self, airplane_mode: bool, info: Option<&NetworkInfo>) -> bool {
        !airplane_mode && info.is_none_or(NetworkInfo::is_connected)
    }

    fn supports_replay(&self) -> bool {
        self.replay
    }
}

/// Records every callback it receives.
#[derive(Default)]
pub(crate) struct RecordingTarget {
    events: Mutex<Vec<String>>,
}

impl RecordingTarget {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub(crate) fn loaded(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with("loaded"))
            .count()
    }

    pub(crate) fn failed(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with("failed"))
            .count()
    }
}

impl Target for RecordingTarget {
    fn on_bitmap_loaded(&self, bitmap: Bitmap, from: LoadedFrom) {
        self.events.lock().push(format!(
            "loaded {}x{} from {from}",
            bitmap.width(),
            bitmap.height()
        ));
    }

    fn on_bitmap_failed(&self, error: &LoadError, error_placeholder: Option<Bitmap>) {
        self.events.lock().push(format!(
            "failed {error} placeholder={}",
            error_placeholder.is_some()
        ));
    }

    fn on_prepare_load(&self, placeholder: Option<Bitmap>) {
        self.events
            .lock()
            .push(format!("prepare placeholder={}", placeholder.is_some()));
    }
}

impl RemoteTarget for RecordingTarget {
    fn apply(&self, bitmap: Bitmap) {
        self.events
            .lock()
            .push(format!("loaded {}x{} remotely", bitmap.width(), bitmap.height()));
    }

    fn apply_error(&self, error_placeholder: Option<Bitmap>) {
        self.events.lock().push(format!(
            "failed remotely placeholder={}",
            error_placeholder.is_some()
        ));
    }
}

/// Counts callback invocations.
#[derive(Default)]
pub(crate) struct CountingCallback {
    pub(crate) successes: AtomicUsize,
    pub(crate) errors: AtomicUsize,
}

impl CountingCallback {
    pub(crate) fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub(crate) fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

impl Callback for CountingCallback {
    fn on_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _error: &LoadError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// Request for `fake:///<name>`.
pub(crate) fn fake_request(name: &str) -> Request {
    let url = url::Url::parse(&format!("{FAKE_SCHEME}:///{name}")).unwrap();
    Request::builder(ImageLocator::Uri(url)).build().unwrap()
}

/// Action fields for a fake request under the given key.
pub(crate) fn params(key: &str) -> ActionParams {
    ActionParams {
        request: fake_request("image.png"),
        key: key.to_string(),
        memory_policy: MemoryPolicy::empty(),
        network_policy: NetworkPolicy::empty(),
        tag: None,
        error_placeholder: None,
    }
}
