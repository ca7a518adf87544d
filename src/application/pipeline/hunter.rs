//! A single load of one cache key, shared by every action asking for it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::error;

use super::action::Action;
use super::dispatcher::DispatcherHandle;
use super::transform::apply_transformations;
use crate::domain::entities::{
    Bitmap, LoadedFrom, MemoryPolicy, NetworkInfo, NetworkPolicy, Priority, Request,
};
use crate::domain::errors::LoadError;
use crate::domain::ports::{Cache, LoadPayload, RequestHandler};
use crate::infrastructure::executor::PrioritizedJob;
use crate::infrastructure::handlers::decode_bytes;
use crate::infrastructure::stats::Stats;

/// Shared collaborators of every hunt.
#[derive(Clone)]
pub struct HuntContext {
    pub cache: Arc<dyn Cache>,
    pub stats: Arc<Stats>,
    pub dispatcher: DispatcherHandle,
    pub logging_enabled: bool,
}

/// A successfully loaded and transformed bitmap.
#[derive(Debug, Clone)]
pub struct HuntOutcome {
    pub bitmap: Bitmap,
    pub loaded_from: LoadedFrom,
}

/// Result of offering an action to a running hunt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// The hunt was cancelled; start a new one.
    Rejected,
    Attached { priority_raised: bool },
}

/// Result of removing an action from a hunt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    NotAttached,
    Detached { priority_lowered: bool },
}

struct HuntState {
    actions: Vec<Arc<Action>>,
    priority: Priority,
    network_policy: NetworkPolicy,
    retry_count: u32,
    cancelled: bool,
    outcome: Option<HuntOutcome>,
}

impl HuntState {
    fn recompute_priority(&mut self) {
        if let Some(max) = self.actions.iter().map(|a| a.priority()).max() {
            self.priority = max;
        }
    }
}

/// Loads, decodes and transforms the image for one key.
///
/// The request and memory policy come from the action that created the
/// hunt; its priority is the highest of all attached actions.
pub struct Hunter {
    sequence: u64,
    key: String,
    request: Request,
    memory_policy: MemoryPolicy,
    handler: Arc<dyn RequestHandler>,
    context: HuntContext,
    state: Mutex<HuntState>,
}

impl std::fmt::Debug for Hunter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Hunter")
            .field("sequence", &self.sequence)
            .field("request", &self.request)
            .field("handler", &self.handler.name())
            .field("actions", &state.actions.len())
            .field("priority", &state.priority)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

impl Hunter {
    #[must_use]
    pub fn new(
        sequence: u64,
        action: Arc<Action>,
        handler: Arc<dyn RequestHandler>,
        context: HuntContext,
    ) -> Arc<Self> {
        action.mark_attached();
        let state = HuntState {
            priority: action.priority(),
            network_policy: action.network_policy(),
            retry_count: handler.retry_count(),
            cancelled: false,
            outcome: None,
            actions: Vec::new(),
        };
        let hunter = Self {
            sequence,
            key: action.key().to_string(),
            request: action.request().clone(),
            memory_policy: action.memory_policy(),
            handler,
            context,
            state: Mutex::new(state),
        };
        hunter.state.lock().actions.push(action);
        Arc::new(hunter)
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    #[must_use]
    pub fn handler_name(&self) -> &'static str {
        self.handler.name()
    }

    /// Joins an action to this hunt unless it was cancelled.
    pub fn try_attach(&self, action: &Arc<Action>) -> Attach {
        let mut state = self.state.lock();
        if state.cancelled {
            return Attach::Rejected;
        }
        action.mark_attached();
        state.actions.push(action.clone());
        let priority_raised = action.priority() > state.priority;
        if priority_raised {
            state.priority = action.priority();
        }
        Attach::Attached { priority_raised }
    }

    /// Removes an action, lowering the hunt priority if it was the highest.
    pub fn detach(&self, action: &Arc<Action>) -> Detach {
        let mut state = self.state.lock();
        let before = state.actions.len();
        state.actions.retain(|a| !Arc::ptr_eq(a, action));
        if state.actions.len() == before {
            return Detach::NotAttached;
        }
        let previous = state.priority;
        state.recompute_priority();
        Detach::Detached {
            priority_lowered: state.priority < previous,
        }
    }

    /// Cancels the hunt if no action is attached any more.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if !state.actions.is_empty() {
            return false;
        }
        state.cancelled = true;
        true
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Snapshot of the attached actions.
    #[must_use]
    pub fn actions(&self) -> Vec<Arc<Action>> {
        self.state.lock().actions.clone()
    }

    /// Detaches and returns every action, for terminal delivery.
    pub fn take_actions(&self) -> Vec<Arc<Action>> {
        std::mem::take(&mut self.state.lock().actions)
    }

    #[must_use]
    pub fn outcome(&self) -> Option<HuntOutcome> {
        self.state.lock().outcome.clone()
    }

    #[must_use]
    pub fn network_policy(&self) -> NetworkPolicy {
        self.state.lock().network_policy
    }

    pub fn add_network_policy(&self, policy: NetworkPolicy) {
        self.state.lock().network_policy |= policy;
    }

    /// Consumes one retry if any remain and the handler agrees.
    pub fn should_retry(&self, airplane_mode: bool, info: Option<&NetworkInfo>) -> bool {
        {
            let mut state = self.state.lock();
            if state.retry_count == 0 {
                return false;
            }
            state.retry_count -= 1;
        }
        self.handler.should_retry(airplane_mode, info)
    }

    #[must_use]
    pub fn supports_replay(&self) -> bool {
        self.handler.supports_replay()
    }

    /// Drops actions whose consumer is gone. Returns true when nothing is
    /// left to deliver to, in which case the hunt is cancelled.
    fn prune_dead_consumers(&self) -> bool {
        let mut state = self.state.lock();
        if state.cancelled {
            return true;
        }
        state.actions.retain(|action| {
            let alive = action.is_consumer_alive();
            if !alive {
                action.cancel();
            }
            alive
        });
        if state.actions.is_empty() {
            state.cancelled = true;
            return true;
        }
        state.recompute_priority();
        false
    }

    /// Produces the bitmap: memory cache, then handler, decode and transforms.
    ///
    /// # Errors
    /// Returns the handler, decode or transformation failure.
    pub async fn hunt(&self) -> Result<HuntOutcome, LoadError> {
        let logging = self.context.logging_enabled;

        if self.memory_policy.should_read_from_memory_cache()
            && let Some(bitmap) = self.context.cache.get(&self.key)
        {
            self.context.stats.dispatch_cache_hit();
            lifecycle!(logging, request = %self.request.log_id(), "Decoded from cache");
            return Ok(HuntOutcome {
                bitmap,
                loaded_from: LoadedFrom::Memory,
            });
        }

        let network_policy = self.network_policy();
        let result = self.handler.load(&self.request, network_policy).await?;
        let loaded_from = result.loaded_from();
        let exif_orientation = result.exif_orientation();
        let bitmap = match result.into_payload() {
            LoadPayload::Bitmap(bitmap) => bitmap,
            LoadPayload::Stream(bytes) => decode_bytes(bytes).await?,
        };
        self.context.stats.dispatch_bitmap_decoded(bitmap.byte_count());
        lifecycle!(
            logging,
            request = %self.request.log_id(),
            from = %loaded_from,
            "Decoded"
        );

        if !self.request.needs_transformation() && exif_orientation.is_none() {
            return Ok(HuntOutcome {
                bitmap,
                loaded_from,
            });
        }
        let bitmap = apply_transformations(&self.request, bitmap, exif_orientation).await?;
        self.context
            .stats
            .dispatch_bitmap_transformed(bitmap.byte_count());
        lifecycle!(logging, request = %self.request.log_id(), "Transformed");
        Ok(HuntOutcome {
            bitmap,
            loaded_from,
        })
    }
}

#[async_trait]
impl PrioritizedJob for Hunter {
    fn priority(&self) -> Priority {
        self.state.lock().priority
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    async fn run(self: Arc<Self>) {
        let dispatcher = self.context.dispatcher.clone();
        if self.prune_dead_consumers() {
            lifecycle!(
                self.context.logging_enabled,
                request = %self.request.log_id(),
                "Discarded, no live consumers"
            );
            dispatcher.dispatch_discard(self);
            return;
        }

        lifecycle!(
            self.context.logging_enabled,
            request = %self.request.log_id(),
            handler = self.handler.name(),
            "Executing"
        );
        let result = match AssertUnwindSafe(self.hunt()).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let error = LoadError::panicked(payload.as_ref());
                error!(request = %self.request.log_id(), %error, "Hunt panicked");
                Err(error)
            }
        };
        match result {
            Ok(outcome) => {
                self.state.lock().outcome = Some(outcome);
                dispatcher.dispatch_complete(self);
            }
            Err(error) if error.is_transient() => dispatcher.dispatch_retry(self, error),
            Err(error) => dispatcher.dispatch_failed(self, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::application::pipeline::action::ActionParams;
    use crate::application::pipeline::dispatcher::DispatcherCommand;
    use crate::application::pipeline::test_support::{FakeHandler, RecordingTarget, params};
    use crate::domain::ports::Target;
    use crate::infrastructure::cache::LruMemoryCache;

    struct Harness {
        context: HuntContext,
        cache: Arc<LruMemoryCache>,
        commands: mpsc::UnboundedReceiver<DispatcherCommand>,
    }

    fn harness() -> Harness {
        let cache = Arc::new(LruMemoryCache::new(1024 * 1024));
        let (tx, commands) = mpsc::unbounded_channel();
        let context = HuntContext {
            cache: cache.clone(),
            stats: Arc::new(Stats::new(cache.clone())),
            dispatcher: DispatcherHandle::new(tx, Duration::from_millis(1)),
            logging_enabled: false,
        };
        Harness {
            context,
            cache,
            commands,
        }
    }

    fn with_priority(key: &str, priority: Priority) -> ActionParams {
        let mut p = params(key);
        p.request = Request::builder(p.request.locator().clone())
            .priority(priority)
            .unwrap()
            .build()
            .unwrap();
        p
    }

    #[tokio::test]
    async fn test_priority_is_max_of_attached_actions() {
        let h = harness();
        let low = Action::fetch(with_priority("k\n", Priority::Low), None);
        let high = Action::fetch(with_priority("k\n", Priority::High), None);
        let hunter = Hunter::new(1, low.clone(), Arc::new(FakeHandler::new()), h.context);

        assert_eq!(hunter.priority(), Priority::Low);
        assert_eq!(
            hunter.try_attach(&high),
            Attach::Attached {
                priority_raised: true
            }
        );
        assert_eq!(hunter.priority(), Priority::High);
        assert_eq!(
            hunter.detach(&high),
            Detach::Detached {
                priority_lowered: true
            }
        );
        assert_eq!(hunter.priority(), Priority::Low);
        assert_eq!(hunter.detach(&high), Detach::NotAttached);
    }

    #[tokio::test]
    async fn test_cancel_requires_no_actions() {
        let h = harness();
        let action = Action::fetch(params("k\n"), None);
        let hunter = Hunter::new(1, action.clone(), Arc::new(FakeHandler::new()), h.context);

        assert!(!hunter.cancel());
        hunter.detach(&action);
        assert!(hunter.cancel());
        assert_eq!(
            hunter.try_attach(&Action::fetch(params("k\n"), None)),
            Attach::Rejected
        );
    }

    #[tokio::test]
    async fn test_retry_budget_is_consumed() {
        let h = harness();
        let handler = Arc::new(FakeHandler::new().with_retry_count(2));
        let hunter = Hunter::new(1, Action::fetch(params("k\n"), None), handler, h.context);

        assert!(hunter.should_retry(false, None));
        assert!(hunter.should_retry(false, None));
        assert!(!hunter.should_retry(false, None));
    }

    #[tokio::test]
    async fn test_hunt_reads_memory_cache_unless_disabled() {
        let h = harness();
        let cached = Bitmap::new(image::DynamicImage::new_rgba8(1, 1));
        h.cache.set("k\n", cached.clone());
        let handler = Arc::new(FakeHandler::new());

        let hunter = Hunter::new(
            1,
            Action::fetch(params("k\n"), None),
            handler.clone(),
            h.context.clone(),
        );
        let outcome = hunter.hunt().await.unwrap();
        assert_eq!(outcome.loaded_from, LoadedFrom::Memory);
        assert!(outcome.bitmap.ptr_eq(&cached));
        assert_eq!(handler.loads(), 0);

        let mut skip = params("k\n");
        skip.memory_policy = MemoryPolicy::NO_CACHE;
        let hunter = Hunter::new(2, Action::fetch(skip, None), handler.clone(), h.context);
        let outcome = hunter.hunt().await.unwrap();
        assert_eq!(outcome.loaded_from, LoadedFrom::Network);
        assert_eq!(handler.loads(), 1);
    }

    #[tokio::test]
    async fn test_hunt_decodes_streams_and_transforms() {
        let h = harness();
        let handler = Arc::new(FakeHandler::new().streaming());
        let mut p = params("k\n");
        p.request = p.request.build_upon().resize(2, 2).unwrap().build().unwrap();
        let hunter = Hunter::new(1, Action::fetch(p, None), handler, h.context);

        let outcome = hunter.hunt().await.unwrap();
        assert_eq!((outcome.bitmap.width(), outcome.bitmap.height()), (2, 2));
        assert_eq!(outcome.loaded_from, LoadedFrom::Disk);
    }

    #[tokio::test]
    async fn test_run_with_dead_consumers_discards_without_loading() {
        let mut h = harness();
        let handler = Arc::new(FakeHandler::new());
        let target: Arc<dyn Target> = Arc::new(RecordingTarget::default());
        let action = Action::target(params("k\n"), &target);
        let hunter = Hunter::new(1, action.clone(), handler.clone(), h.context);
        drop(target);

        hunter.clone().run().await;

        assert!(matches!(
            h.commands.recv().await,
            Some(DispatcherCommand::Discard(_))
        ));
        assert_eq!(handler.loads(), 0);
        assert!(hunter.is_cancelled());
        assert!(action.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_routes_outcomes() {
        let mut h = harness();
        let handler = Arc::new(
            FakeHandler::new().failing_with(vec![
                LoadError::network("reset"),
                LoadError::decode("bad"),
            ]),
        );
        let hunter = Hunter::new(
            1,
            Action::fetch(params("k\n"), None),
            handler,
            h.context,
        );

        hunter.clone().run().await;
        assert!(matches!(
            h.commands.recv().await,
            Some(DispatcherCommand::Retry(_, LoadError::Network { .. }))
        ));

        hunter.clone().run().await;
        assert!(matches!(
            h.commands.recv().await,
            Some(DispatcherCommand::Failed(_, LoadError::Decode { .. }))
        ));

        hunter.clone().run().await;
        assert!(matches!(
            h.commands.recv().await,
            Some(DispatcherCommand::Complete(_))
        ));
        assert!(hunter.outcome().is_some());
    }
}
