//! Single-task actor owning all pipeline bookkeeping.
//!
//! Every state change (submission, cancellation, completion, retries,
//! pausing, connectivity) arrives as a [`DispatcherCommand`] and is handled
//! in order on one task, so the maps below need no locking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::action::{Action, ConsumerId, TargetRegistry};
use super::handler_chain::RequestHandlerChain;
use super::hunter::{Attach, Detach, HuntContext, Hunter};
use crate::domain::entities::{Bitmap, LoadedFrom, NetworkInfo, NetworkPolicy, Tag};
use crate::domain::errors::LoadError;
use crate::domain::ports::{Cache, Listener};
use crate::infrastructure::executor::{ExecutorOwnership, PrioritizedJob, PriorityExecutor};
use crate::infrastructure::stats::Stats;

/// Messages processed by the dispatcher task.
pub enum DispatcherCommand {
    Submit(Arc<Action>),
    Cancel(Arc<Action>),
    PauseTag(Tag),
    ResumeTag(Tag),
    Complete(Arc<Hunter>),
    Retry(Arc<Hunter>, LoadError),
    Failed(Arc<Hunter>, LoadError),
    Discard(Arc<Hunter>),
    NetworkStateChange(Option<NetworkInfo>),
    AirplaneModeChange(bool),
    /// Acknowledged once every earlier command has been handled.
    Flush(oneshot::Sender<()>),
    Shutdown,
}

impl std::fmt::Debug for DispatcherCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submit(action) => write!(f, "Submit({:?})", action.request()),
            Self::Cancel(action) => write!(f, "Cancel({:?})", action.request()),
            Self::PauseTag(tag) => write!(f, "PauseTag({tag})"),
            Self::ResumeTag(tag) => write!(f, "ResumeTag({tag})"),
            Self::Complete(hunter) => write!(f, "Complete({:?})", hunter.request()),
            Self::Retry(hunter, error) => write!(f, "Retry({:?}, {error})", hunter.request()),
            Self::Failed(hunter, error) => write!(f, "Failed({:?}, {error})", hunter.request()),
            Self::Discard(hunter) => write!(f, "Discard({:?})", hunter.request()),
            Self::NetworkStateChange(info) => write!(f, "NetworkStateChange({info:?})"),
            Self::AirplaneModeChange(on) => write!(f, "AirplaneModeChange({on})"),
            Self::Flush(_) => write!(f, "Flush"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Cloneable sender side of the dispatcher.
///
/// Sends never block. Once the dispatcher has stopped, commands are dropped.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    commands: mpsc::UnboundedSender<DispatcherCommand>,
    retry_delay: Duration,
}

impl DispatcherHandle {
    pub(crate) const fn new(
        commands: mpsc::UnboundedSender<DispatcherCommand>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            commands,
            retry_delay,
        }
    }

    fn send(&self, command: DispatcherCommand) {
        if let Err(e) = self.commands.send(command) {
            debug!(command = ?e.0, "Dispatcher stopped, command dropped");
        }
    }

    pub fn dispatch_submit(&self, action: Arc<Action>) {
        self.send(DispatcherCommand::Submit(action));
    }

    pub fn dispatch_cancel(&self, action: Arc<Action>) {
        self.send(DispatcherCommand::Cancel(action));
    }

    pub fn dispatch_pause_tag(&self, tag: Tag) {
        self.send(DispatcherCommand::PauseTag(tag));
    }

    pub fn dispatch_resume_tag(&self, tag: Tag) {
        self.send(DispatcherCommand::ResumeTag(tag));
    }

    pub fn dispatch_complete(&self, hunter: Arc<Hunter>) {
        self.send(DispatcherCommand::Complete(hunter));
    }

    /// Hands a transient failure back after the retry delay.
    pub fn dispatch_retry(&self, hunter: Arc<Hunter>, error: LoadError) {
        let commands = self.commands.clone();
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(DispatcherCommand::Retry(hunter, error));
        });
    }

    pub fn dispatch_failed(&self, hunter: Arc<Hunter>, error: LoadError) {
        self.send(DispatcherCommand::Failed(hunter, error));
    }

    pub fn dispatch_discard(&self, hunter: Arc<Hunter>) {
        self.send(DispatcherCommand::Discard(hunter));
    }

    pub fn dispatch_network_state_change(&self, info: Option<NetworkInfo>) {
        self.send(DispatcherCommand::NetworkStateChange(info));
    }

    pub fn dispatch_airplane_mode_change(&self, airplane_mode: bool) {
        self.send(DispatcherCommand::AirplaneModeChange(airplane_mode));
    }

    pub fn dispatch_shutdown(&self) {
        self.send(DispatcherCommand::Shutdown);
    }

    /// Waits until every command sent before this call has been handled.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        self.send(DispatcherCommand::Flush(ack));
        let _ = done.await;
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

/// Collaborators handed to [`Dispatcher::spawn`].
pub struct DispatcherConfig {
    pub executor: Arc<PriorityExecutor>,
    pub ownership: ExecutorOwnership,
    pub handlers: Arc<RequestHandlerChain>,
    pub cache: Arc<dyn Cache>,
    pub stats: Arc<Stats>,
    pub registry: Arc<TargetRegistry>,
    pub listener: Option<Arc<dyn Listener>>,
    pub retry_delay: Duration,
    pub logging_enabled: bool,
    pub scans_network_changes: bool,
}

/// Identifies an action in the paused and failed maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ActionKey {
    Consumer(ConsumerId),
    Detached(usize),
}

fn action_key(action: &Arc<Action>) -> ActionKey {
    action.consumer().map_or_else(
        || ActionKey::Detached(Arc::as_ptr(action) as usize),
        ActionKey::Consumer,
    )
}

/// The dispatcher actor.
pub struct Dispatcher {
    commands: mpsc::UnboundedReceiver<DispatcherCommand>,
    handle: DispatcherHandle,
    executor: Arc<PriorityExecutor>,
    ownership: ExecutorOwnership,
    handlers: Arc<RequestHandlerChain>,
    cache: Arc<dyn Cache>,
    stats: Arc<Stats>,
    registry: Arc<TargetRegistry>,
    listener: Option<Arc<dyn Listener>>,
    logging_enabled: bool,
    scans_network_changes: bool,

    hunters: HashMap<String, Arc<Hunter>>,
    failed_actions: HashMap<ActionKey, Arc<Action>>,
    paused_actions: HashMap<ActionKey, Arc<Action>>,
    paused_tags: HashSet<Tag>,
    airplane_mode: bool,
    network_info: Option<NetworkInfo>,
    next_sequence: u64,
}

impl Dispatcher {
    /// Starts the dispatcher task.
    #[must_use]
    pub fn spawn(config: DispatcherConfig) -> (DispatcherHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::unbounded_channel();
        let handle = DispatcherHandle::new(tx, config.retry_delay);
        let dispatcher = Self {
            commands,
            handle: handle.clone(),
            executor: config.executor,
            ownership: config.ownership,
            handlers: config.handlers,
            cache: config.cache,
            stats: config.stats,
            registry: config.registry,
            listener: config.listener,
            logging_enabled: config.logging_enabled,
            scans_network_changes: config.scans_network_changes,
            hunters: HashMap::new(),
            failed_actions: HashMap::new(),
            paused_actions: HashMap::new(),
            paused_tags: HashSet::new(),
            airplane_mode: false,
            network_info: None,
            next_sequence: 0,
        };
        let task = tokio::spawn(dispatcher.run());
        (handle, task)
    }

    async fn run(mut self) {
        debug!("Dispatcher started");
        while let Some(command) = self.commands.recv().await {
            if !self.handle_command(command) {
                break;
            }
        }
        debug!("Dispatcher stopped");
    }

    /// Returns false once the dispatcher should stop.
    fn handle_command(&mut self, command: DispatcherCommand) -> bool {
        match command {
            DispatcherCommand::Submit(action) => self.perform_submit(action, true),
            DispatcherCommand::Cancel(action) => self.perform_cancel(&action),
            DispatcherCommand::PauseTag(tag) => self.perform_pause_tag(tag),
            DispatcherCommand::ResumeTag(tag) => self.perform_resume_tag(&tag),
            DispatcherCommand::Complete(hunter) => self.perform_complete(&hunter),
            DispatcherCommand::Retry(hunter, error) => self.perform_retry(&hunter, &error),
            DispatcherCommand::Failed(hunter, error) => {
                self.perform_error(&hunter, &error);
            }
            DispatcherCommand::Discard(hunter) => self.perform_discard(&hunter),
            DispatcherCommand::NetworkStateChange(info) => {
                self.perform_network_state_change(info);
            }
            DispatcherCommand::AirplaneModeChange(airplane_mode) => {
                debug!(airplane_mode, "Airplane mode changed");
                self.airplane_mode = airplane_mode;
            }
            DispatcherCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            DispatcherCommand::Shutdown => {
                self.perform_shutdown();
                return false;
            }
        }
        true
    }

    fn hunt_context(&self) -> HuntContext {
        HuntContext {
            cache: self.cache.clone(),
            stats: self.stats.clone(),
            dispatcher: self.handle.clone(),
            logging_enabled: self.logging_enabled,
        }
    }

    fn remove_hunter(&mut self, hunter: &Arc<Hunter>) {
        if self
            .hunters
            .get(hunter.key())
            .is_some_and(|current| Arc::ptr_eq(current, hunter))
        {
            self.hunters.remove(hunter.key());
        }
    }

    fn perform_submit(&mut self, action: Arc<Action>, dismiss_failed: bool) {
        if action.is_finished() {
            return;
        }
        if action.tag().is_some_and(|tag| self.paused_tags.contains(tag)) {
            lifecycle!(
                self.logging_enabled,
                request = %action.request().log_id(),
                tag = ?action.tag().map(Tag::as_str),
                "Paused"
            );
            self.paused_actions.insert(action_key(&action), action);
            return;
        }

        if let Some(hunter) = self.hunters.get(action.key()) {
            match hunter.try_attach(&action) {
                Attach::Attached { priority_raised } => {
                    if priority_raised {
                        self.executor.reprioritize();
                    }
                    lifecycle!(
                        self.logging_enabled,
                        request = %action.request().log_id(),
                        joined = %hunter.request().plain_id(),
                        "Joined"
                    );
                    return;
                }
                Attach::Rejected => {}
            }
        }

        if self.executor.is_shutdown() {
            lifecycle!(
                self.logging_enabled,
                request = %action.request().log_id(),
                "Ignored, executor is shut down"
            );
            return;
        }

        let Some(handler) = self.handlers.find(action.request()) else {
            let error = LoadError::UnrecognizedRequest {
                request: action.request().to_string(),
            };
            self.deliver_error(&action, &error);
            return;
        };

        self.next_sequence += 1;
        let hunter = Hunter::new(
            self.next_sequence,
            action.clone(),
            handler,
            self.hunt_context(),
        );
        if let Err(e) = self.executor.submit(hunter.clone()) {
            debug!(request = %action.request().log_id(), error = %e, "Submission rejected");
            return;
        }
        self.hunters.insert(action.key().to_string(), hunter.clone());
        if dismiss_failed {
            self.failed_actions.remove(&action_key(&action));
        }
        lifecycle!(
            self.logging_enabled,
            request = %action.request().log_id(),
            handler = hunter.handler_name(),
            priority = %action.priority(),
            "Enqueued"
        );
    }

    fn perform_cancel(&mut self, action: &Arc<Action>) {
        if let Some(hunter) = self.hunters.get(action.key()).cloned() {
            let detached = hunter.detach(action);
            if hunter.cancel() {
                self.hunters.remove(action.key());
                self.executor.cancel(hunter.sequence());
                lifecycle!(
                    self.logging_enabled,
                    request = %hunter.request().log_id(),
                    "Canceled"
                );
            } else if detached == (Detach::Detached { priority_lowered: true }) {
                self.executor.reprioritize();
            }
        }

        let key = action_key(action);
        if self.paused_actions.remove(&key).is_some() {
            lifecycle!(
                self.logging_enabled,
                request = %action.request().log_id(),
                "Canceled from paused"
            );
        }
        if self.failed_actions.remove(&key).is_some() {
            lifecycle!(
                self.logging_enabled,
                request = %action.request().log_id(),
                "Canceled from replay"
            );
        }
    }

    fn perform_pause_tag(&mut self, tag: Tag) {
        if !self.paused_tags.insert(tag.clone()) {
            return;
        }
        let mut emptied = Vec::new();
        let mut lowered = false;
        for hunter in self.hunters.values() {
            let mut detached = false;
            for action in hunter.actions() {
                if action.tag() != Some(&tag) {
                    continue;
                }
                if hunter.detach(&action) == (Detach::Detached { priority_lowered: true }) {
                    lowered = true;
                }
                detached = true;
                lifecycle!(
                    self.logging_enabled,
                    request = %action.request().log_id(),
                    tag = %tag,
                    "Paused"
                );
                self.paused_actions.insert(action_key(&action), action);
            }
            if detached && hunter.cancel() {
                emptied.push(hunter.clone());
            }
        }
        for hunter in emptied {
            self.remove_hunter(&hunter);
            self.executor.cancel(hunter.sequence());
        }
        if lowered {
            self.executor.reprioritize();
        }
    }

    fn perform_resume_tag(&mut self, tag: &Tag) {
        if !self.paused_tags.remove(tag) {
            return;
        }
        let mut resumed = Vec::new();
        self.paused_actions.retain(|_, action| {
            if action.tag() == Some(tag) {
                resumed.push(action.clone());
                false
            } else {
                true
            }
        });

        for action in resumed {
            if action.is_finished() {
                continue;
            }
            if action.memory_policy().should_read_from_memory_cache()
                && let Some(bitmap) = self.cache.get(action.key())
            {
                self.stats.dispatch_cache_hit();
                self.deliver_complete(&action, &bitmap, LoadedFrom::Memory);
                continue;
            }
            self.perform_submit(action, false);
        }
    }

    fn perform_complete(&mut self, hunter: &Arc<Hunter>) {
        if hunter.is_cancelled() {
            self.remove_hunter(hunter);
            return;
        }
        let Some(outcome) = hunter.outcome() else {
            return;
        };
        let actions = hunter.take_actions();
        self.remove_hunter(hunter);

        let writes_memory = actions.iter().any(|action| {
            !action.is_cancelled()
                && action.is_consumer_alive()
                && action.memory_policy().should_write_to_memory_cache()
        });
        if writes_memory {
            self.cache.set(hunter.key(), outcome.bitmap.clone());
        }

        lifecycle!(
            self.logging_enabled,
            request = %hunter.request().log_id(),
            actions = actions.len(),
            "Completed"
        );
        for action in &actions {
            self.deliver_complete(action, &outcome.bitmap, outcome.loaded_from);
        }
    }

    fn perform_retry(&mut self, hunter: &Arc<Hunter>, error: &LoadError) {
        if hunter.is_cancelled() {
            self.remove_hunter(hunter);
            return;
        }
        if self.executor.is_shutdown() {
            self.perform_error(hunter, error);
            return;
        }

        let info = if self.scans_network_changes {
            self.network_info
        } else {
            None
        };
        let will_replay = self.scans_network_changes && hunter.supports_replay();

        if !hunter.should_retry(self.airplane_mode, info.as_ref()) {
            self.fail_and_replay(hunter, error, will_replay);
            return;
        }

        let connected = info.as_ref().is_none_or(NetworkInfo::is_connected);
        if self.scans_network_changes && !connected {
            self.fail_and_replay(hunter, error, will_replay);
            return;
        }

        if error.is_content_length() {
            hunter.add_network_policy(NetworkPolicy::NO_CACHE);
        }
        lifecycle!(
            self.logging_enabled,
            request = %hunter.request().log_id(),
            error = %error,
            "Retrying"
        );
        if self.executor.submit(hunter.clone()).is_err() {
            self.perform_error(hunter, error);
        }
    }

    fn fail_and_replay(&mut self, hunter: &Arc<Hunter>, error: &LoadError, will_replay: bool) {
        let failed = self.perform_error(hunter, error);
        if !will_replay {
            return;
        }
        for action in failed {
            if action.is_cancelled() || !action.is_consumer_alive() {
                continue;
            }
            // Stays registered until replayed, cancelled or reaped.
            if action.consumer().is_some() && !self.registry.restore(&action) {
                continue;
            }
            lifecycle!(
                self.logging_enabled,
                request = %action.request().log_id(),
                "Marked for replay"
            );
            self.failed_actions.insert(action_key(&action), action);
        }
    }

    /// Delivers a terminal failure. Returns the actions it was delivered to.
    fn perform_error(&mut self, hunter: &Arc<Hunter>, error: &LoadError) -> Vec<Arc<Action>> {
        if hunter.is_cancelled() {
            self.remove_hunter(hunter);
            return Vec::new();
        }
        let actions = hunter.take_actions();
        self.remove_hunter(hunter);

        lifecycle!(
            self.logging_enabled,
            request = %hunter.request().log_id(),
            error = %error,
            "Errored"
        );
        if let Some(listener) = &self.listener {
            listener.on_image_load_failed(hunter.request().uri(), error);
        }
        for action in &actions {
            self.deliver_error(action, error);
        }
        actions
    }

    fn perform_discard(&mut self, hunter: &Arc<Hunter>) {
        self.remove_hunter(hunter);
        lifecycle!(
            self.logging_enabled,
            request = %hunter.request().log_id(),
            "Discarded"
        );
    }

    fn perform_network_state_change(&mut self, info: Option<NetworkInfo>) {
        if !self.scans_network_changes {
            return;
        }
        self.network_info = info;
        if self.ownership == ExecutorOwnership::Owned {
            self.executor.adjust_thread_count(info.as_ref());
        }
        if info.is_some_and(|info| info.is_connected()) && !self.failed_actions.is_empty() {
            self.flush_failed_actions();
        }
    }

    fn flush_failed_actions(&mut self) {
        let failed: Vec<Arc<Action>> = self.failed_actions.drain().map(|(_, a)| a).collect();
        for action in failed {
            let Some(replayed) = action.replay() else {
                continue;
            };
            // A consumer whose entry was replaced or removed since the failure
            // has moved on.
            if replayed.consumer().is_some() && !self.registry.replace(&action, &replayed) {
                continue;
            }
            lifecycle!(
                self.logging_enabled,
                request = %replayed.request().log_id(),
                "Replaying"
            );
            self.perform_submit(replayed, false);
        }
    }

    fn perform_shutdown(&mut self) {
        if self.ownership == ExecutorOwnership::Owned {
            self.executor.shutdown();
        }
        self.hunters.clear();
        self.paused_actions.clear();
        self.paused_tags.clear();
        self.failed_actions.clear();
        debug!("Dispatcher shut down");
    }

    fn deliver_complete(&self, action: &Arc<Action>, bitmap: &Bitmap, loaded_from: LoadedFrom) {
        self.registry.remove_action(action);
        let delivered = action.complete(bitmap, loaded_from);
        lifecycle!(
            self.logging_enabled,
            request = %action.request().log_id(),
            from = %loaded_from,
            delivered,
            "Delivered"
        );
    }

    fn deliver_error(&self, action: &Arc<Action>, error: &LoadError) {
        self.registry.remove_action(action);
        let delivered = action.error(error);
        lifecycle!(
            self.logging_enabled,
            request = %action.request().log_id(),
            error = %error,
            delivered,
            "Delivered error"
        );
    }
}
