//! The `Lever` facade: entry points, cancellation, invalidation and lifecycle.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use url::Url;

use super::pipeline::{
    Action, BuiltInHandlers, ConsumerId, Dispatcher, DispatcherConfig, DispatcherHandle,
    HuntContext, RequestHandlerChain, TargetRegistry, lifecycle,
};
use super::use_cases::RequestCreator;
use crate::domain::entities::{Bitmap, ImageLocator, NetworkInfo, Request, RequestBuilder, Tag};
use crate::domain::errors::{LeverError, LeverResult};
use crate::domain::ports::{
    AssetResolver, Cache, ContentResolver, Downloader, Listener, RemoteTarget, RequestHandler,
    RequestTransformer, ResourceResolver, Target,
};
use crate::infrastructure::cache::{DiskCache, LruMemoryCache, NoCache, default_cache_dir};
use crate::infrastructure::config::LeverConfig;
use crate::infrastructure::executor::{ExecutorOwnership, PriorityExecutor};
use crate::infrastructure::http::HttpDownloader;
use crate::infrastructure::stats::{Stats, StatsSnapshot};

/// How often registered actions are checked for dropped consumers.
const REAPER_INTERVAL: Duration = Duration::from_secs(1);

struct LeverInner {
    cache: Arc<dyn Cache>,
    stats: Arc<Stats>,
    downloader: Arc<dyn Downloader>,
    executor: Arc<PriorityExecutor>,
    ownership: ExecutorOwnership,
    handlers: Arc<RequestHandlerChain>,
    registry: Arc<TargetRegistry>,
    dispatcher: DispatcherHandle,
    request_transformer: Option<Arc<dyn RequestTransformer>>,
    logging_enabled: bool,
    next_request_id: AtomicU64,
    shutdown: AtomicBool,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for LeverInner {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        self.dispatcher.dispatch_shutdown();
    }
}

/// Image loading pipeline.
///
/// Cheap to clone; clones share the same caches, executor and dispatcher.
/// Dropping the last clone stops the dispatcher.
#[derive(Clone)]
pub struct Lever {
    inner: Arc<LeverInner>,
}

impl std::fmt::Debug for Lever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lever")
            .field("handlers", &self.inner.handlers)
            .field("executor", &self.inner.executor)
            .field("ownership", &self.inner.ownership)
            .field("targets", &self.inner.registry.len())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl Lever {
    #[must_use]
    pub fn builder() -> LeverBuilder {
        LeverBuilder::new()
    }

    /// Builds a pipeline with the default collaborators for `config`.
    ///
    /// # Errors
    /// Returns error if the disk cache or HTTP client cannot be created.
    pub async fn with_defaults(config: LeverConfig) -> LeverResult<Self> {
        LeverBuilder::new().config(config).build().await
    }

    /// Starts a request for a URI string. Strings without a scheme are taken
    /// as file paths.
    ///
    /// # Errors
    /// Returns an argument error for a blank or unparsable URI.
    pub fn load_uri(&self, uri: &str) -> LeverResult<RequestCreator> {
        Ok(self.load_url(parse_uri(uri)?))
    }

    #[must_use]
    pub fn load_url(&self, url: Url) -> RequestCreator {
        self.creator(RequestBuilder::new(ImageLocator::Uri(url)))
    }

    /// Starts a request for a file. `None` yields a request with no image,
    /// which only cancels and shows the placeholder.
    ///
    /// # Errors
    /// Returns an argument error if the path cannot be made absolute.
    pub fn load_path(&self, path: Option<&Path>) -> LeverResult<RequestCreator> {
        match path {
            Some(path) => Ok(self.load_url(file_url(path)?)),
            None => Ok(self.creator(RequestBuilder::empty())),
        }
    }

    /// Starts a request for a bundled resource.
    ///
    /// # Errors
    /// Returns an argument error for resource id 0.
    pub fn load_resource(&self, resource_id: u32) -> LeverResult<RequestCreator> {
        if resource_id == 0 {
            return Err(LeverError::invalid_argument("Resource ID must not be zero."));
        }
        Ok(self.creator(RequestBuilder::new(ImageLocator::Resource(resource_id))))
    }

    /// Starts a request for encoded image bytes already in memory.
    #[must_use]
    pub fn load_bytes(&self, bytes: Bytes) -> RequestCreator {
        self.creator(RequestBuilder::new(ImageLocator::Bytes(bytes)))
    }

    fn creator(&self, builder: RequestBuilder) -> RequestCreator {
        RequestCreator::new(self.clone(), builder)
    }

    /// Drops every memory-cache entry for the URI, whatever its transforms.
    ///
    /// # Errors
    /// Returns an argument error for a blank or unparsable URI.
    pub fn invalidate_uri(&self, uri: &str) -> LeverResult<()> {
        let url = parse_uri(uri)?;
        self.inner.cache.clear_key_prefix(url.as_str());
        Ok(())
    }

    /// Drops every memory-cache entry for the file.
    ///
    /// # Errors
    /// Returns an argument error if the path cannot be made absolute.
    pub fn invalidate_path(&self, path: &Path) -> LeverResult<()> {
        let url = file_url(path)?;
        self.inner.cache.clear_key_prefix(url.as_str());
        Ok(())
    }

    pub fn cancel_target(&self, target: &Arc<dyn Target>) {
        self.cancel_existing(ConsumerId::of(target));
    }

    pub fn cancel_remote(&self, target: &Arc<dyn RemoteTarget>) {
        self.cancel_existing(ConsumerId::of(target));
    }

    /// Cancels every registered request carrying the tag.
    pub fn cancel_tag(&self, tag: &Tag) {
        for action in self.inner.registry.with_tag(tag) {
            if let Some(consumer) = action.consumer() {
                self.cancel_existing(consumer);
            }
        }
    }

    /// Parks in-flight and future requests carrying the tag.
    pub fn pause_tag(&self, tag: Tag) {
        self.inner.dispatcher.dispatch_pause_tag(tag);
    }

    /// Re-issues requests parked by [`pause_tag`](Self::pause_tag).
    pub fn resume_tag(&self, tag: Tag) {
        self.inner.dispatcher.dispatch_resume_tag(tag);
    }

    /// Reports a connectivity change. `None` means unknown.
    pub fn notify_network_state(&self, info: Option<NetworkInfo>) {
        self.inner.dispatcher.dispatch_network_state_change(info);
    }

    pub fn notify_airplane_mode(&self, airplane_mode: bool) {
        self.inner.dispatcher.dispatch_airplane_mode_change(airplane_mode);
    }

    /// Waits until every command issued so far has been handled and every
    /// stats event applied.
    pub async fn flush(&self) {
        self.inner.dispatcher.flush().await;
        self.inner.stats.flush().await;
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    #[must_use]
    pub fn memory_cache(&self) -> &Arc<dyn Cache> {
        &self.inner.cache
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<PriorityExecutor> {
        &self.inner.executor
    }

    #[must_use]
    pub fn is_logging_enabled(&self) -> bool {
        self.inner.logging_enabled
    }

    /// Stops the pipeline. Idempotent.
    ///
    /// Clears the memory cache and stops the reaper, the stats collector, the
    /// dispatcher and an owned executor. Results of in-flight loads are
    /// dropped.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cache.clear();
        if let Some(reaper) = self.inner.reaper.lock().take() {
            reaper.abort();
        }
        self.inner.stats.shutdown();
        self.inner.dispatcher.dispatch_shutdown();
        self.inner.downloader.shutdown();
        info!("Lever shut down");
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_running(&self) -> LeverResult<()> {
        if self.is_shutdown() {
            return Err(LeverError::Shutdown);
        }
        Ok(())
    }

    pub(crate) fn handlers(&self) -> &RequestHandlerChain {
        &self.inner.handlers
    }

    pub(crate) fn hunt_context(&self) -> HuntContext {
        HuntContext {
            cache: self.inner.cache.clone(),
            stats: self.inner.stats.clone(),
            dispatcher: self.inner.dispatcher.clone(),
            logging_enabled: self.inner.logging_enabled,
        }
    }

    /// Builds a request, stamps its id and start time, and applies the
    /// request transformer.
    pub(crate) fn create_request(&self, builder: RequestBuilder) -> LeverResult<Request> {
        let mut request = builder.build()?;
        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        request.assign_identity(id, Instant::now());
        lifecycle!(
            self.inner.logging_enabled,
            request = %request.plain_id(),
            details = %request,
            "Created"
        );

        let Some(transformer) = &self.inner.request_transformer else {
            return Ok(request);
        };
        let transformed = transformer
            .transform_request(request.clone())
            .with_identity_of(&request);
        lifecycle!(
            self.inner.logging_enabled,
            request = %transformed.plain_id(),
            details = %transformed,
            "Changed"
        );
        Ok(transformed)
    }

    /// Synchronous memory-cache lookup that records the hit or miss.
    pub(crate) fn quick_memory_cache_check(&self, key: &str) -> Option<Bitmap> {
        let cached = self.inner.cache.get(key);
        if cached.is_some() {
            self.inner.stats.dispatch_cache_hit();
        } else {
            self.inner.stats.dispatch_cache_miss();
        }
        cached
    }

    /// Registers the action for its consumer, cancelling the one it
    /// replaces, and hands it to the dispatcher.
    pub(crate) fn enqueue_and_submit(&self, action: Arc<Action>) {
        if let Some(previous) = self.inner.registry.insert(&action)
            && !Arc::ptr_eq(&previous, &action)
        {
            self.cancel_action(previous);
        }
        self.inner.dispatcher.dispatch_submit(action);
    }

    pub(crate) fn cancel_existing(&self, consumer: ConsumerId) {
        if let Some(action) = self.inner.registry.remove(consumer) {
            self.cancel_action(action);
        }
    }

    fn cancel_action(&self, action: Arc<Action>) {
        action.cancel();
        lifecycle!(
            self.inner.logging_enabled,
            request = %action.request().log_id(),
            "Canceled by caller"
        );
        self.inner.dispatcher.dispatch_cancel(action);
    }
}

fn parse_uri(uri: &str) -> LeverResult<Url> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(LeverError::invalid_argument("Path must not be empty."));
    }
    match Url::parse(trimmed) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => file_url(Path::new(trimmed)),
        Err(e) => Err(LeverError::invalid_argument(format!(
            "Invalid URI {trimmed}: {e}"
        ))),
    }
}

fn file_url(path: &Path) -> LeverResult<Url> {
    let absolute = std::path::absolute(path)
        .map_err(|e| LeverError::invalid_argument(format!("Invalid path: {e}")))?;
    Url::from_file_path(&absolute).map_err(|()| {
        LeverError::invalid_argument(format!("Invalid path: {}", absolute.display()))
    })
}

fn spawn_reaper(
    registry: Arc<TargetRegistry>,
    dispatcher: DispatcherHandle,
    logging_enabled: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REAPER_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            for action in registry.take_dead() {
                lifecycle!(
                    logging_enabled,
                    request = %action.request().log_id(),
                    "Consumer dropped, canceling"
                );
                action.cancel();
                dispatcher.dispatch_cancel(action);
            }
        }
    })
}

fn set_once<T>(slot: &mut Option<T>, value: T, what: &str) -> LeverResult<()> {
    if slot.is_some() {
        return Err(LeverError::illegal_state(format!("{what} already set.")));
    }
    *slot = Some(value);
    Ok(())
}

/// Assembles a [`Lever`]. Unset collaborators get defaults derived from the
/// configuration.
#[derive(Default)]
pub struct LeverBuilder {
    downloader: Option<Arc<dyn Downloader>>,
    executor: Option<Arc<PriorityExecutor>>,
    memory_cache: Option<Arc<dyn Cache>>,
    listener: Option<Arc<dyn Listener>>,
    request_transformer: Option<Arc<dyn RequestTransformer>>,
    request_handlers: Vec<Arc<dyn RequestHandler>>,
    content_resolver: Option<Arc<dyn ContentResolver>>,
    asset_resolver: Option<Arc<dyn AssetResolver>>,
    resource_resolver: Option<Arc<dyn ResourceResolver>>,
    logging_enabled: Option<bool>,
    retry_delay: Option<Duration>,
    scans_network_changes: Option<bool>,
    config: Option<LeverConfig>,
}

impl LeverBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns a state error if a downloader was already set.
    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> LeverResult<Self> {
        set_once(&mut self.downloader, downloader, "Downloader")?;
        Ok(self)
    }

    /// Uses a caller-owned executor. It is never resized or shut down by the
    /// pipeline.
    ///
    /// # Errors
    /// Returns a state error if an executor was already set.
    pub fn executor(mut self, executor: Arc<PriorityExecutor>) -> LeverResult<Self> {
        set_once(&mut self.executor, executor, "Executor")?;
        Ok(self)
    }

    /// # Errors
    /// Returns a state error if a memory cache was already set.
    pub fn memory_cache(mut self, memory_cache: Arc<dyn Cache>) -> LeverResult<Self> {
        set_once(&mut self.memory_cache, memory_cache, "Memory cache")?;
        Ok(self)
    }

    /// # Errors
    /// Returns a state error if a listener was already set.
    pub fn listener(mut self, listener: Arc<dyn Listener>) -> LeverResult<Self> {
        set_once(&mut self.listener, listener, "Listener")?;
        Ok(self)
    }

    /// # Errors
    /// Returns a state error if a transformer was already set.
    pub fn request_transformer(
        mut self,
        transformer: Arc<dyn RequestTransformer>,
    ) -> LeverResult<Self> {
        set_once(&mut self.request_transformer, transformer, "Request transformer")?;
        Ok(self)
    }

    /// Registers a handler consulted after the resource handler and before
    /// the content, asset, file and network handlers.
    ///
    /// # Errors
    /// Returns a state error if the same handler is registered twice.
    pub fn add_request_handler(mut self, handler: Arc<dyn RequestHandler>) -> LeverResult<Self> {
        if self
            .request_handlers
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &handler))
        {
            return Err(LeverError::illegal_state("RequestHandler already registered."));
        }
        self.request_handlers.push(handler);
        Ok(self)
    }

    /// # Errors
    /// Returns a state error if a content resolver was already set.
    pub fn content_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> LeverResult<Self> {
        set_once(&mut self.content_resolver, resolver, "Content resolver")?;
        Ok(self)
    }

    /// # Errors
    /// Returns a state error if an asset resolver was already set.
    pub fn asset_resolver(mut self, resolver: Arc<dyn AssetResolver>) -> LeverResult<Self> {
        set_once(&mut self.asset_resolver, resolver, "Asset resolver")?;
        Ok(self)
    }

    /// # Errors
    /// Returns a state error if a resource resolver was already set.
    pub fn resource_resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> LeverResult<Self> {
        set_once(&mut self.resource_resolver, resolver, "Resource resolver")?;
        Ok(self)
    }

    /// Logs request lifecycle events at debug instead of trace.
    #[must_use]
    pub const fn logging_enabled(mut self, enabled: bool) -> Self {
        self.logging_enabled = Some(enabled);
        self
    }

    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    #[must_use]
    pub const fn scans_network_changes(mut self, scans: bool) -> Self {
        self.scans_network_changes = Some(scans);
        self
    }

    /// Source of defaults for everything not set explicitly.
    #[must_use]
    pub fn config(mut self, config: LeverConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Creates the pipeline. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns error if the default downloader cannot be created.
    pub async fn build(self) -> LeverResult<Lever> {
        let config = self.config.unwrap_or_default();
        let logging_enabled = self.logging_enabled.unwrap_or(config.logging_enabled);
        let retry_delay = self.retry_delay.unwrap_or_else(|| config.retry_delay());
        let scans_network_changes = self
            .scans_network_changes
            .unwrap_or(config.scans_network_changes);

        let downloader: Arc<dyn Downloader> = match self.downloader {
            Some(downloader) => downloader,
            None => Arc::new(default_downloader(&config).await?),
        };
        let cache = self
            .memory_cache
            .unwrap_or_else(|| default_memory_cache(&config));
        let (executor, ownership) = match self.executor {
            Some(executor) => (executor, ExecutorOwnership::Shared),
            None => (
                Arc::new(PriorityExecutor::new(config.thread_count)),
                ExecutorOwnership::Owned,
            ),
        };
        let stats = Arc::new(Stats::new(cache.clone()));

        let handlers = Arc::new(RequestHandlerChain::new(
            BuiltInHandlers {
                downloader: downloader.clone(),
                stats: stats.clone(),
                content_resolver: self.content_resolver,
                asset_resolver: self.asset_resolver,
                resource_resolver: self.resource_resolver,
            },
            self.request_handlers,
        )?);
        let registry = Arc::new(TargetRegistry::new());

        let (dispatcher, _task) = Dispatcher::spawn(DispatcherConfig {
            executor: executor.clone(),
            ownership,
            handlers: handlers.clone(),
            cache: cache.clone(),
            stats: stats.clone(),
            registry: registry.clone(),
            listener: self.listener,
            retry_delay,
            logging_enabled,
            scans_network_changes,
        });
        let reaper = spawn_reaper(registry.clone(), dispatcher.clone(), logging_enabled);

        debug!(
            handlers = ?handlers.names(),
            memory_cache_size = cache.max_size(),
            threads = executor.thread_count(),
            ?ownership,
            "Lever started"
        );

        Ok(Lever {
            inner: Arc::new(LeverInner {
                cache,
                stats,
                downloader,
                executor,
                ownership,
                handlers,
                registry,
                dispatcher,
                request_transformer: self.request_transformer,
                logging_enabled,
                next_request_id: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                reaper: Mutex::new(Some(reaper)),
            }),
        })
    }
}

/// A zero budget disables memory caching entirely.
fn default_memory_cache(config: &LeverConfig) -> Arc<dyn Cache> {
    match config.effective_memory_cache_size() {
        0 => Arc::new(NoCache),
        max_size => Arc::new(LruMemoryCache::new(max_size)),
    }
}

async fn default_downloader(config: &LeverConfig) -> LeverResult<HttpDownloader> {
    let dir = config
        .disk_cache_dir
        .clone()
        .unwrap_or_else(default_cache_dir);
    let disk_cache = DiskCache::new(dir, config.disk_cache_size).await?;
    Ok(HttpDownloader::new(
        Some(Arc::new(disk_cache)),
        config.timeout(),
    )?)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::application::pipeline::test_support::{
        CountingCallback, FakeHandler, RecordingTarget,
    };
    use crate::domain::entities::{MemoryPolicy, Priority};
    use crate::domain::errors::LoadError;
    use crate::domain::ports::mocks::MockDownloader;
    use crate::infrastructure::handlers::{DirectoryAssetResolver, png_bytes};

    async fn lever_with(handler: &Arc<FakeHandler>) -> Lever {
        builder_with(handler).build().await.unwrap()
    }

    fn idle_downloader() -> MockDownloader {
        let mut downloader = MockDownloader::new();
        downloader.expect_shutdown().returning(|| ());
        downloader
    }

    fn builder_with(handler: &Arc<FakeHandler>) -> LeverBuilder {
        Lever::builder()
            .downloader(Arc::new(idle_downloader()))
            .unwrap()
            .add_request_handler(handler.clone())
            .unwrap()
            .retry_delay(Duration::from_millis(5))
            .logging_enabled(true)
    }

    async fn settle(lever: &Lever) {
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            lever.flush().await;
        }
    }

    fn target() -> (Arc<RecordingTarget>, Arc<dyn Target>) {
        let recorder = Arc::new(RecordingTarget::default());
        let target: Arc<dyn Target> = recorder.clone();
        (recorder, target)
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_load() {
        let handler = Arc::new(FakeHandler::new().with_delay(Duration::from_millis(50)));
        let lever = lever_with(&handler).await;
        let (first, first_target) = target();
        let (second, second_target) = target();

        lever
            .load_uri("fake:///cat.png")
            .unwrap()
            .into_target(&first_target)
            .unwrap();
        lever
            .load_uri("fake:///cat.png")
            .unwrap()
            .into_target(&second_target)
            .unwrap();
        settle(&lever).await;

        assert_eq!(handler.loads(), 1);
        assert_eq!(first.loaded(), 1);
        assert_eq!(second.loaded(), 1);

        let (third, third_target) = target();
        lever
            .load_uri("fake:///cat.png")
            .unwrap()
            .into_target(&third_target)
            .unwrap();
        assert_eq!(third.events(), vec!["loaded 4x4 from memory"]);
        assert_eq!(handler.loads(), 1);

        lever.flush().await;
        let snapshot = lever.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 2);
    }

    #[tokio::test]
    async fn test_dropped_consumer_skips_load_and_cache_write() {
        let handler = Arc::new(FakeHandler::new().with_delay(Duration::from_millis(80)));
        let executor = Arc::new(PriorityExecutor::new(1));
        let lever = builder_with(&handler)
            .executor(executor)
            .unwrap()
            .build()
            .await
            .unwrap();

        lever
            .load_uri("fake:///blocker.png")
            .unwrap()
            .fetch(None)
            .unwrap();
        let (_, doomed) = target();
        lever
            .load_uri("fake:///doomed.png")
            .unwrap()
            .into_target(&doomed)
            .unwrap();
        drop(doomed);
        settle(&lever).await;

        assert_eq!(handler.loads(), 1);
        assert!(lever.memory_cache().get("fake:///doomed.png\n").is_none());
        assert!(lever.memory_cache().get("fake:///blocker.png\n").is_some());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let handler = Arc::new(
            FakeHandler::new()
                .with_retry_count(2)
                .failing_with(vec![LoadError::io("reset"), LoadError::io("reset")]),
        );
        let lever = lever_with(&handler).await;
        let (recorder, target) = target();

        lever
            .load_uri("fake:///flaky.png")
            .unwrap()
            .into_target(&target)
            .unwrap();
        settle(&lever).await;

        assert_eq!(handler.loads(), 3);
        assert_eq!(recorder.loaded(), 1);
        assert_eq!(recorder.failed(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_error_and_listener() {
        struct Failures(AtomicUsize);

        impl Listener for Failures {
            fn on_image_load_failed(&self, uri: Option<&Url>, _error: &LoadError) {
                assert_eq!(uri.map(Url::as_str), Some("fake:///broken.png"));
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let handler = Arc::new(
            FakeHandler::new()
                .with_retry_count(1)
                .failing_with(vec![LoadError::io("a"), LoadError::io("b")]),
        );
        let listener = Arc::new(Failures(AtomicUsize::new(0)));
        let lever = builder_with(&handler)
            .listener(listener.clone())
            .unwrap()
            .build()
            .await
            .unwrap();
        let (recorder, target) = target();

        lever
            .load_uri("fake:///broken.png")
            .unwrap()
            .error(Bitmap::new(image::DynamicImage::new_rgba8(1, 1)))
            .into_target(&target)
            .unwrap();
        settle(&lever).await;

        assert_eq!(handler.loads(), 2);
        assert_eq!(
            recorder.events(),
            vec![
                "prepare placeholder=false",
                "failed I/O error: b placeholder=true"
            ]
        );
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_load_and_frees_key() {
        let handler = Arc::new(FakeHandler::new().panicking(1));
        let lever = lever_with(&handler).await;
        let first = Arc::new(CountingCallback::default());
        let second = Arc::new(CountingCallback::default());

        lever
            .load_uri("fake:///boom.png")
            .unwrap()
            .fetch(Some(first.clone()))
            .unwrap();
        settle(&lever).await;
        assert_eq!(first.errors(), 1);
        assert_eq!(first.successes(), 0);

        lever
            .load_uri("fake:///boom.png")
            .unwrap()
            .fetch(Some(second.clone()))
            .unwrap();
        settle(&lever).await;
        assert_eq!(second.successes(), 1);
        assert_eq!(handler.loads(), 2);
    }

    #[tokio::test]
    async fn test_cancel_lowers_queued_hunt_priority() {
        let handler = Arc::new(FakeHandler::new().with_delay(Duration::from_millis(60)));
        let executor = Arc::new(PriorityExecutor::new(1));
        let lever = builder_with(&handler)
            .executor(executor.clone())
            .unwrap()
            .build()
            .await
            .unwrap();

        lever
            .load_uri("fake:///blocker.png")
            .unwrap()
            .priority(Priority::High)
            .unwrap()
            .fetch(None)
            .unwrap();
        lever.flush().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(executor.running(), 1);

        lever.load_uri("fake:///a.png").unwrap().fetch(None).unwrap();
        let (_recorder, urgent) = target();
        lever
            .load_uri("fake:///a.png")
            .unwrap()
            .priority(Priority::High)
            .unwrap()
            .into_target(&urgent)
            .unwrap();
        lever
            .load_uri("fake:///b.png")
            .unwrap()
            .priority(Priority::Normal)
            .unwrap()
            .fetch(None)
            .unwrap();
        lever.cancel_target(&urgent);
        lever.flush().await;
        assert_eq!(executor.queued(), 2);

        settle(&lever).await;
        settle(&lever).await;
        assert_eq!(handler.paths(), vec!["/blocker.png", "/b.png", "/a.png"]);
    }

    #[tokio::test]
    async fn test_cancel_target_suppresses_callbacks() {
        let handler = Arc::new(FakeHandler::new().with_delay(Duration::from_millis(50)));
        let lever = lever_with(&handler).await;
        let (recorder, target) = target();

        lever
            .load_uri("fake:///cat.png")
            .unwrap()
            .into_target(&target)
            .unwrap();
        lever.cancel_target(&target);
        settle(&lever).await;

        assert_eq!(recorder.events(), vec!["prepare placeholder=false"]);
        assert!(lever.memory_cache().get("fake:///cat.png\n").is_none());
    }

    #[tokio::test]
    async fn test_new_request_replaces_previous_for_target() {
        let handler = Arc::new(FakeHandler::new().with_delay(Duration::from_millis(30)));
        let lever = lever_with(&handler).await;
        let (recorder, target) = target();

        lever
            .load_uri("fake:///first.png")
            .unwrap()
            .into_target(&target)
            .unwrap();
        lever
            .load_uri("fake:///second.png")
            .unwrap()
            .into_target(&target)
            .unwrap();
        settle(&lever).await;

        assert_eq!(recorder.loaded(), 1);
        assert!(lever.memory_cache().get("fake:///second.png\n").is_some());
    }

    #[tokio::test]
    async fn test_pause_and_resume_by_tag() {
        let handler = Arc::new(FakeHandler::new());
        let lever = lever_with(&handler).await;
        let (recorder, target) = target();

        lever.pause_tag(Tag::new("feed"));
        lever
            .load_uri("fake:///cat.png")
            .unwrap()
            .tag(Tag::new("feed"))
            .unwrap()
            .into_target(&target)
            .unwrap();
        settle(&lever).await;
        assert_eq!(handler.loads(), 0);
        assert_eq!(recorder.loaded(), 0);

        lever.resume_tag(Tag::new("feed"));
        settle(&lever).await;
        assert_eq!(handler.loads(), 1);
        assert_eq!(recorder.loaded(), 1);
    }

    #[tokio::test]
    async fn test_cancel_tag() {
        let handler = Arc::new(FakeHandler::new().with_delay(Duration::from_millis(50)));
        let lever = lever_with(&handler).await;
        let (tagged, tagged_target) = target();
        let (other, other_target) = target();

        lever
            .load_uri("fake:///a.png")
            .unwrap()
            .tag(Tag::new("row"))
            .unwrap()
            .into_target(&tagged_target)
            .unwrap();
        lever
            .load_uri("fake:///b.png")
            .unwrap()
            .into_target(&other_target)
            .unwrap();
        lever.cancel_tag(&Tag::new("row"));
        settle(&lever).await;

        assert_eq!(tagged.loaded(), 0);
        assert_eq!(other.loaded(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let handler = Arc::new(FakeHandler::new());
        let lever = lever_with(&handler).await;
        let callback = Arc::new(CountingCallback::default());

        lever
            .load_uri("fake:///cat.png")
            .unwrap()
            .resize(2, 2)
            .unwrap()
            .fetch(Some(callback.clone()))
            .unwrap();
        settle(&lever).await;
        assert_eq!(callback.successes(), 1);
        assert!(
            lever
                .memory_cache()
                .get("fake:///cat.png\nresize:2x2\n")
                .is_some()
        );

        lever.invalidate_uri("fake:///cat.png").unwrap();
        assert_eq!(lever.memory_cache().size(), 0);

        lever
            .load_uri("fake:///cat.png")
            .unwrap()
            .resize(2, 2)
            .unwrap()
            .fetch(Some(callback.clone()))
            .unwrap();
        settle(&lever).await;
        assert_eq!(handler.loads(), 2);
        assert_eq!(callback.successes(), 2);
    }

    #[tokio::test]
    async fn test_memory_policy_no_cache_skips_lookup() {
        let handler = Arc::new(FakeHandler::new());
        let lever = lever_with(&handler).await;
        let (recorder, target) = target();

        lever.load_uri("fake:///cat.png").unwrap().fetch(None).unwrap();
        settle(&lever).await;
        lever
            .load_uri("fake:///cat.png")
            .unwrap()
            .memory_policy(MemoryPolicy::NO_CACHE, &[])
            .into_target(&target)
            .unwrap();
        settle(&lever).await;

        assert_eq!(handler.loads(), 2);
        assert_eq!(recorder.events()[1], "loaded 4x4 from network");
    }

    #[tokio::test]
    async fn test_get_runs_inline_with_transforms() {
        let handler = Arc::new(FakeHandler::new());
        let lever = lever_with(&handler).await;

        let bitmap = lever
            .load_uri("fake:///cat.png")
            .unwrap()
            .resize(2, 1)
            .unwrap()
            .get()
            .await
            .unwrap();

        assert_eq!((bitmap.width(), bitmap.height()), (2, 1));
        assert_eq!(lever.memory_cache().size(), 0);
    }

    #[tokio::test]
    async fn test_assets_route_to_asset_resolver() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logo.png"), png_bytes(3, 2)).unwrap();
        let handler = Arc::new(FakeHandler::new());
        let lever = builder_with(&handler)
            .asset_resolver(Arc::new(DirectoryAssetResolver::new(dir.path())))
            .unwrap()
            .build()
            .await
            .unwrap();

        let bitmap = lever
            .load_uri("file:///android_asset/logo.png")
            .unwrap()
            .get()
            .await
            .unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (3, 2));
    }

    #[tokio::test]
    async fn test_bytes_are_decoded() {
        let handler = Arc::new(FakeHandler::new());
        let lever = lever_with(&handler).await;
        let (recorder, target) = target();

        lever
            .load_bytes(png_bytes(5, 5))
            .priority(Priority::High)
            .unwrap()
            .into_target(&target)
            .unwrap();
        settle(&lever).await;

        assert_eq!(recorder.events()[1], "loaded 5x5 from memory");
    }

    #[tokio::test]
    async fn test_request_transformer_rewrites_before_keying() {
        struct Redirect;

        impl RequestTransformer for Redirect {
            fn transform_request(&self, request: Request) -> Request {
                let url = Url::parse("fake:///redirected.png").unwrap();
                request
                    .build_upon()
                    .locator(ImageLocator::Uri(url))
                    .build()
                    .unwrap()
            }
        }

        let handler = Arc::new(FakeHandler::new());
        let lever = builder_with(&handler)
            .request_transformer(Arc::new(Redirect))
            .unwrap()
            .build()
            .await
            .unwrap();

        let request = lever
            .create_request(RequestBuilder::new(ImageLocator::Resource(9)))
            .unwrap();
        assert_eq!(request.uri().map(Url::as_str), Some("fake:///redirected.png"));

        lever
            .load_resource(9)
            .unwrap()
            .fetch(None)
            .unwrap();
        settle(&lever).await;
        assert!(
            lever
                .memory_cache()
                .get("fake:///redirected.png\n")
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_configuration_errors_are_synchronous() {
        let handler = Arc::new(FakeHandler::new());
        let lever = lever_with(&handler).await;
        let (_, target) = target();

        assert!(matches!(
            lever.load_uri("   "),
            Err(LeverError::InvalidArgument { .. })
        ));
        assert!(matches!(
            lever.load_resource(0),
            Err(LeverError::InvalidArgument { .. })
        ));
        assert!(matches!(
            lever
                .load_uri("ftp://example.com/a.png")
                .unwrap()
                .into_target(&target),
            Err(LeverError::NoHandler { .. })
        ));
        assert!(
            Lever::builder()
                .add_request_handler(handler.clone())
                .unwrap()
                .add_request_handler(handler.clone())
                .is_err()
        );
        assert!(
            Lever::builder()
                .downloader(Arc::new(MockDownloader::new()))
                .unwrap()
                .downloader(Arc::new(MockDownloader::new()))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_missing_image_cancels_and_prepares() {
        let handler = Arc::new(FakeHandler::new().with_delay(Duration::from_millis(30)));
        let lever = lever_with(&handler).await;
        let (recorder, target) = target();

        lever
            .load_uri("fake:///cat.png")
            .unwrap()
            .into_target(&target)
            .unwrap();
        lever
            .load_path(None)
            .unwrap()
            .placeholder(Bitmap::new(image::DynamicImage::new_rgba8(1, 1)))
            .unwrap()
            .into_target(&target)
            .unwrap();
        settle(&lever).await;

        assert_eq!(
            recorder.events(),
            vec!["prepare placeholder=false", "prepare placeholder=true"]
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_final() {
        let handler = Arc::new(FakeHandler::new());
        let mut downloader = MockDownloader::new();
        downloader.expect_shutdown().times(1).returning(|| ());
        let lever = Lever::builder()
            .downloader(Arc::new(downloader))
            .unwrap()
            .add_request_handler(handler.clone())
            .unwrap()
            .build()
            .await
            .unwrap();
        lever.load_uri("fake:///cat.png").unwrap().fetch(None).unwrap();
        settle(&lever).await;

        lever.shutdown();
        lever.shutdown();
        settle(&lever).await;

        assert!(lever.is_shutdown());
        assert_eq!(lever.memory_cache().size(), 0);
        assert!(lever.executor().is_shutdown());
        let (_, target) = target();
        assert!(matches!(
            lever
                .load_uri("fake:///cat.png")
                .unwrap()
                .into_target(&target),
            Err(LeverError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_zero_memory_budget_disables_memory_cache() {
        let handler = Arc::new(FakeHandler::new());
        let config = LeverConfig {
            memory_cache_size: Some(0),
            ..LeverConfig::default()
        };
        let lever = builder_with(&handler)
            .config(config)
            .build()
            .await
            .unwrap();
        assert_eq!(lever.memory_cache().max_size(), 0);

        for _ in 0..2 {
            lever.load_uri("fake:///cat.png").unwrap().fetch(None).unwrap();
            settle(&lever).await;
        }
        assert_eq!(handler.loads(), 2);
        assert!(lever.memory_cache().get("fake:///cat.png\n").is_none());

        let sized = builder_with(&handler).build().await.unwrap();
        assert!(sized.memory_cache().max_size() > 0);
    }

    #[tokio::test]
    async fn test_shared_executor_survives_shutdown() {
        let handler = Arc::new(FakeHandler::new());
        let executor = Arc::new(PriorityExecutor::new(2));
        let lever = builder_with(&handler)
            .executor(executor.clone())
            .unwrap()
            .build()
            .await
            .unwrap();

        lever.shutdown();
        settle(&lever).await;
        assert!(!executor.is_shutdown());
    }

    #[tokio::test]
    async fn test_reaper_cancels_dropped_targets() {
        let handler = Arc::new(FakeHandler::new().with_delay(Duration::from_secs(5)));
        let executor = Arc::new(PriorityExecutor::new(1));
        let lever = builder_with(&handler)
            .executor(executor.clone())
            .unwrap()
            .build()
            .await
            .unwrap();

        lever
            .load_uri("fake:///blocker.png")
            .unwrap()
            .priority(Priority::High)
            .unwrap()
            .fetch(None)
            .unwrap();
        settle(&lever).await;
        assert_eq!(executor.running(), 1);

        let (_, doomed) = target();
        lever
            .load_uri("fake:///doomed.png")
            .unwrap()
            .into_target(&doomed)
            .unwrap();
        settle(&lever).await;
        assert_eq!(executor.queued(), 1);

        drop(doomed);
        tokio::time::sleep(REAPER_INTERVAL + Duration::from_millis(200)).await;
        lever.flush().await;
        assert_eq!(executor.queued(), 0);
    }
}
