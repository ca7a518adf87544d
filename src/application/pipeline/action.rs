//! Consumer-bound requests and the registry tracking them.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::domain::entities::{
    Bitmap, LoadedFrom, MemoryPolicy, NetworkPolicy, Priority, Request, Tag,
};
use crate::domain::errors::LoadError;
use crate::domain::ports::{Callback, RemoteTarget, Target};

/// Identity of a consumer, derived from its allocation.
///
/// Actions hold their consumer weakly, which keeps the allocation (and so
/// the address) reserved for as long as the action lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(usize);

impl ConsumerId {
    /// Identity of the value behind `consumer`.
    #[must_use]
    pub fn of<T: ?Sized>(consumer: &Arc<T>) -> Self {
        Self(Arc::as_ptr(consumer).cast::<()>() as usize)
    }
}

/// Who receives the outcome of an action.
pub enum ActionKind {
    /// A display target, held weakly.
    Target { target: Weak<dyn Target> },
    /// A remote surface, held weakly, plus an optional callback.
    Remote {
        target: Weak<dyn RemoteTarget>,
        callback: Option<Arc<dyn Callback>>,
    },
    /// Warms the caches. The callback, if any, is held strongly.
    Fetch { callback: Option<Arc<dyn Callback>> },
}

impl ActionKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Target { .. } => "target",
            Self::Remote { .. } => "remote",
            Self::Fetch { .. } => "fetch",
        }
    }

    fn replica(&self) -> Self {
        match self {
            Self::Target { target } => Self::Target {
                target: target.clone(),
            },
            Self::Remote { target, callback } => Self::Remote {
                target: target.clone(),
                callback: callback.clone(),
            },
            Self::Fetch { callback } => Self::Fetch {
                callback: callback.clone(),
            },
        }
    }
}

impl std::fmt::Debug for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fields shared by every action kind.
#[derive(Debug, Clone)]
pub struct ActionParams {
    pub request: Request,
    pub key: String,
    pub memory_policy: MemoryPolicy,
    pub network_policy: NetworkPolicy,
    pub tag: Option<Tag>,
    pub error_placeholder: Option<Bitmap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionState {
    Pending,
    Attached,
    Completed,
    Failed,
    Cancelled,
}

/// One consumer's interest in one request.
///
/// An action delivers at most one terminal outcome, and none once cancelled.
#[derive(Debug)]
pub struct Action {
    params: ActionParams,
    kind: ActionKind,
    consumer: Option<ConsumerId>,
    state: Mutex<ActionState>,
}

impl Action {
    fn new(params: ActionParams, kind: ActionKind, consumer: Option<ConsumerId>) -> Arc<Self> {
        Arc::new(Self {
            params,
            kind,
            consumer,
            state: Mutex::new(ActionState::Pending),
        })
    }

    /// Action delivering into a display target.
    #[must_use]
    pub fn target(params: ActionParams, target: &Arc<dyn Target>) -> Arc<Self> {
        Self::new(
            params,
            ActionKind::Target {
                target: Arc::downgrade(target),
            },
            Some(ConsumerId::of(target)),
        )
    }

    /// Action delivering into a remote surface.
    #[must_use]
    pub fn remote(
        params: ActionParams,
        target: &Arc<dyn RemoteTarget>,
        callback: Option<Arc<dyn Callback>>,
    ) -> Arc<Self> {
        Self::new(
            params,
            ActionKind::Remote {
                target: Arc::downgrade(target),
                callback,
            },
            Some(ConsumerId::of(target)),
        )
    }

    /// Action that only warms the caches.
    #[must_use]
    pub fn fetch(params: ActionParams, callback: Option<Arc<dyn Callback>>) -> Arc<Self> {
        Self::new(params, ActionKind::Fetch { callback }, None)
    }

    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.params.request
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.params.key
    }

    #[must_use]
    pub const fn memory_policy(&self) -> MemoryPolicy {
        self.params.memory_policy
    }

    #[must_use]
    pub const fn network_policy(&self) -> NetworkPolicy {
        self.params.network_policy
    }

    #[must_use]
    pub const fn tag(&self) -> Option<&Tag> {
        self.params.tag.as_ref()
    }

    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.params.request.priority()
    }

    #[must_use]
    pub const fn kind(&self) -> &ActionKind {
        &self.kind
    }

    /// Identity of the consumer; `None` for fetches.
    #[must_use]
    pub const fn consumer(&self) -> Option<ConsumerId> {
        self.consumer
    }

    /// Returns false once a weakly held consumer has been dropped.
    #[must_use]
    pub fn is_consumer_alive(&self) -> bool {
        match &self.kind {
            ActionKind::Target { target } => target.strong_count() > 0,
            ActionKind::Remote { target, .. } => target.strong_count() > 0,
            ActionKind::Fetch { .. } => true,
        }
    }

    /// Marks the action cancelled. Returns false if it already finished.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            ActionState::Pending | ActionState::Attached => {
                *state = ActionState::Cancelled;
                true
            }
            ActionState::Completed | ActionState::Failed | ActionState::Cancelled => false,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.state.lock() == ActionState::Cancelled
    }

    /// Returns true once the action completed, failed or was cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(
            *self.state.lock(),
            ActionState::Pending | ActionState::Attached
        )
    }

    pub(crate) fn mark_attached(&self) {
        let mut state = self.state.lock();
        if *state == ActionState::Pending {
            *state = ActionState::Attached;
        }
    }

    fn finish(&self, next: ActionState) -> bool {
        let mut state = self.state.lock();
        match *state {
            ActionState::Pending | ActionState::Attached => {
                *state = next;
                true
            }
            ActionState::Completed | ActionState::Failed | ActionState::Cancelled => false,
        }
    }

    /// Delivers a loaded bitmap. Returns whether a consumer received it.
    pub fn complete(&self, bitmap: &Bitmap, loaded_from: LoadedFrom) -> bool {
        if !self.finish(ActionState::Completed) {
            return false;
        }
        match &self.kind {
            ActionKind::Target { target } => {
                let Some(target) = target.upgrade() else {
                    return false;
                };
                target.on_bitmap_loaded(bitmap.clone(), loaded_from);
            }
            ActionKind::Remote { target, callback } => {
                let Some(target) = target.upgrade() else {
                    return false;
                };
                target.apply(bitmap.clone());
                if let Some(callback) = callback {
                    callback.on_success();
                }
            }
            ActionKind::Fetch { callback } => {
                if let Some(callback) = callback {
                    callback.on_success();
                }
            }
        }
        true
    }

    /// Delivers a terminal failure. Returns whether a consumer received it.
    pub fn error(&self, error: &LoadError) -> bool {
        if !self.finish(ActionState::Failed) {
            return false;
        }
        let placeholder = self.params.error_placeholder.clone();
        match &self.kind {
            ActionKind::Target { target } => {
                let Some(target) = target.upgrade() else {
                    return false;
                };
                target.on_bitmap_failed(error, placeholder);
            }
            ActionKind::Remote { target, callback } => {
                let Some(target) = target.upgrade() else {
                    return false;
                };
                target.apply_error(placeholder);
                if let Some(callback) = callback {
                    callback.on_error(error);
                }
            }
            ActionKind::Fetch { callback } => {
                if let Some(callback) = callback {
                    callback.on_error(error);
                }
            }
        }
        true
    }

    /// Creates a fresh action for the same consumer and request, to be
    /// resubmitted once connectivity returns. `None` if the consumer is gone.
    #[must_use]
    pub fn replay(&self) -> Option<Arc<Self>> {
        if !self.is_consumer_alive() {
            return None;
        }
        Some(Self::new(
            self.params.clone(),
            self.kind.replica(),
            self.consumer,
        ))
    }
}

/// Consumer to in-flight action map.
///
/// Submitting for a consumer that already has an action replaces (and
/// cancels) the previous one.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    actions: Mutex<HashMap<ConsumerId, Arc<Action>>>,
}

impl TargetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action. Returns the action it replaced, if any.
    /// Fetch actions are not tracked.
    pub fn insert(&self, action: &Arc<Action>) -> Option<Arc<Action>> {
        let consumer = action.consumer()?;
        self.actions.lock().insert(consumer, action.clone())
    }

    pub fn remove(&self, consumer: ConsumerId) -> Option<Arc<Action>> {
        self.actions.lock().remove(&consumer)
    }

    /// Removes the entry for the action's consumer only if it is this very
    /// action. Returns whether an entry was removed.
    pub fn remove_action(&self, action: &Arc<Action>) -> bool {
        let Some(consumer) = action.consumer() else {
            return false;
        };
        let mut actions = self.actions.lock();
        match actions.get(&consumer) {
            Some(current) if Arc::ptr_eq(current, action) => {
                actions.remove(&consumer);
                true
            }
            _ => false,
        }
    }

    /// Registers an action only if its consumer has no entry. Returns
    /// whether it was registered.
    pub fn restore(&self, action: &Arc<Action>) -> bool {
        let Some(consumer) = action.consumer() else {
            return false;
        };
        match self.actions.lock().entry(consumer) {
            Entry::Vacant(slot) => {
                slot.insert(action.clone());
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Swaps `current` for `next` if `current` is still the consumer's
    /// registered action. Returns whether the swap happened.
    pub fn replace(&self, current: &Arc<Action>, next: &Arc<Action>) -> bool {
        let Some(consumer) = current.consumer() else {
            return false;
        };
        match self.actions.lock().get_mut(&consumer) {
            Some(slot) if Arc::ptr_eq(slot, current) => {
                *slot = next.clone();
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn get(&self, consumer: ConsumerId) -> Option<Arc<Action>> {
        self.actions.lock().get(&consumer).cloned()
    }

    #[must_use]
    pub fn contains(&self, consumer: ConsumerId) -> bool {
        self.actions.lock().contains_key(&consumer)
    }

    /// Actions carrying the given tag.
    #[must_use]
    pub fn with_tag(&self, tag: &Tag) -> Vec<Arc<Action>> {
        self.actions
            .lock()
            .values()
            .filter(|action| action.tag() == Some(tag))
            .cloned()
            .collect()
    }

    /// Removes and returns the actions whose consumer has been dropped.
    pub fn take_dead(&self) -> Vec<Arc<Action>> {
        let mut dead = Vec::new();
        self.actions.lock().retain(|_, action| {
            if action.is_consumer_alive() {
                true
            } else {
                dead.push(action.clone());
                false
            }
        });
        dead
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }
}
