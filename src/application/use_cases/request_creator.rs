//! Fluent request construction and delivery.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::application::Lever;
use crate::application::pipeline::{Action, ActionParams, ConsumerId, Hunter, lifecycle};
use crate::domain::entities::{
    Bitmap, BitmapConfig, CropGravity, LoadedFrom, MemoryPolicy, NetworkPolicy, Priority,
    RequestBuilder, Tag, create_key,
};
use crate::domain::errors::{LeverError, LeverResult, LoadError};
use crate::domain::ports::{Callback, RemoteTarget, Target, Transformation};

/// Holds the bitmap of a [`RequestCreator::load`] until the callback fires.
#[derive(Default)]
struct LoadSlot(Mutex<Option<Bitmap>>);

impl RemoteTarget for LoadSlot {
    fn apply(&self, bitmap: Bitmap) {
        *self.0.lock() = Some(bitmap);
    }

    fn apply_error(&self, _error_placeholder: Option<Bitmap>) {}
}

/// Resolves a [`RequestCreator::load`]. Only the pipeline holds it, so an
/// action dropped without delivery closes the channel.
struct LoadNotifier {
    slot: Arc<LoadSlot>,
    sender: Mutex<Option<oneshot::Sender<LeverResult<Bitmap>>>>,
}

impl LoadNotifier {
    fn send(&self, result: LeverResult<Bitmap>) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(result);
        }
    }
}

impl Callback for LoadNotifier {
    fn on_success(&self) {
        let bitmap = self.slot.0.lock().take();
        self.send(bitmap.ok_or_else(|| LeverError::illegal_state("Delivered without a bitmap.")));
    }

    fn on_error(&self, error: &LoadError) {
        self.send(Err(error.clone().into()));
    }
}

/// Builds one image request and hands it to a consumer.
///
/// Obtained from [`Lever::load_uri`] and friends. Transform setters validate
/// eagerly and return an error instead of building an invalid request.
#[must_use = "a request does nothing until it is delivered with get, load, fetch or into_target"]
pub struct RequestCreator {
    lever: Lever,
    builder: RequestBuilder,
    set_placeholder: bool,
    placeholder: Option<Bitmap>,
    error_placeholder: Option<Bitmap>,
    tag: Option<Tag>,
    memory_policy: MemoryPolicy,
    network_policy: NetworkPolicy,
}

impl std::fmt::Debug for RequestCreator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCreator")
            .field("has_image", &self.builder.has_image())
            .field("tag", &self.tag)
            .field("memory_policy", &self.memory_policy)
            .field("network_policy", &self.network_policy)
            .finish_non_exhaustive()
    }
}

impl RequestCreator {
    pub(crate) fn new(lever: Lever, builder: RequestBuilder) -> Self {
        Self {
            lever,
            builder,
            set_placeholder: true,
            placeholder: None,
            error_placeholder: None,
            tag: None,
            memory_policy: MemoryPolicy::empty(),
            network_policy: NetworkPolicy::empty(),
        }
    }

    /// # Errors
    /// Returns an argument error if both dimensions are zero.
    pub fn resize(mut self, target_width: u32, target_height: u32) -> LeverResult<Self> {
        self.builder = self.builder.resize(target_width, target_height)?;
        Ok(self)
    }

    /// # Errors
    /// Returns a state error if center-inside is already set.
    pub fn center_crop(mut self, gravity: CropGravity) -> LeverResult<Self> {
        self.builder = self.builder.center_crop(gravity)?;
        Ok(self)
    }

    /// # Errors
    /// Returns a state error if center-crop is already set.
    pub fn center_inside(mut self) -> LeverResult<Self> {
        self.builder = self.builder.center_inside()?;
        Ok(self)
    }

    /// # Errors
    /// Returns a state error if no resize was requested.
    pub fn only_scale_down(mut self) -> LeverResult<Self> {
        self.builder = self.builder.only_scale_down()?;
        Ok(self)
    }

    pub fn rotate(mut self, degrees: f32) -> Self {
        self.builder = self.builder.rotate(degrees);
        self
    }

    pub fn rotate_about(mut self, degrees: f32, pivot_x: f32, pivot_y: f32) -> Self {
        self.builder = self.builder.rotate_about(degrees, pivot_x, pivot_y);
        self
    }

    pub fn config(mut self, config: BitmapConfig) -> Self {
        self.builder = self.builder.config(config);
        self
    }

    pub fn stable_key(mut self, stable_key: impl Into<String>) -> Self {
        self.builder = self.builder.stable_key(stable_key);
        self
    }

    /// # Errors
    /// Returns a state error if a priority was already set.
    pub fn priority(mut self, priority: Priority) -> LeverResult<Self> {
        self.builder = self.builder.priority(priority)?;
        Ok(self)
    }

    /// # Errors
    /// Returns an argument error if the transformation has an empty key.
    pub fn transform(mut self, transformation: Arc<dyn Transformation>) -> LeverResult<Self> {
        self.builder = self.builder.transform(transformation)?;
        Ok(self)
    }

    pub fn purgeable(mut self) -> Self {
        self.builder = self.builder.purgeable();
        self
    }

    /// Groups the request for [`Lever::pause_tag`], [`Lever::resume_tag`]
    /// and [`Lever::cancel_tag`].
    ///
    /// # Errors
    /// Returns a state error if a tag was already set.
    pub fn tag(mut self, tag: Tag) -> LeverResult<Self> {
        if self.tag.is_some() {
            return Err(LeverError::illegal_state("Tag already set."));
        }
        self.tag = Some(tag);
        Ok(self)
    }

    /// Bitmap handed to `on_prepare_load` while the request runs.
    ///
    /// # Errors
    /// Returns a state error after [`no_placeholder`](Self::no_placeholder).
    pub fn placeholder(mut self, placeholder: Bitmap) -> LeverResult<Self> {
        if !self.set_placeholder {
            return Err(LeverError::illegal_state(
                "Placeholder already disabled.",
            ));
        }
        self.placeholder = Some(placeholder);
        Ok(self)
    }

    /// Leaves the consumer untouched before the load instead of preparing it
    /// with a placeholder.
    ///
    /// # Errors
    /// Returns a state error if a placeholder was already set.
    pub fn no_placeholder(mut self) -> LeverResult<Self> {
        if self.placeholder.is_some() {
            return Err(LeverError::illegal_state("Placeholder image already set."));
        }
        self.set_placeholder = false;
        Ok(self)
    }

    /// Bitmap handed to failure callbacks.
    pub fn error(mut self, error_placeholder: Bitmap) -> Self {
        self.error_placeholder = Some(error_placeholder);
        self
    }

    pub fn memory_policy(mut self, policy: MemoryPolicy, additional: &[MemoryPolicy]) -> Self {
        self.memory_policy |= MemoryPolicy::combine(policy, additional);
        self
    }

    pub fn network_policy(mut self, policy: NetworkPolicy, additional: &[NetworkPolicy]) -> Self {
        self.network_policy |= NetworkPolicy::combine(policy, additional);
        self
    }

    /// Loads the image inline, bypassing the dispatcher. The result is not
    /// stored in the memory cache.
    ///
    /// # Errors
    /// Returns a configuration error, [`LeverError::Shutdown`], or the load
    /// failure.
    pub async fn get(self) -> LeverResult<Bitmap> {
        self.lever.ensure_running()?;
        let lever = self.lever.clone();
        let params = self.into_params()?;
        let handler = lever.handlers().require(&params.request)?;
        let action = Action::fetch(params, None);
        let hunter = Hunter::new(0, action, handler, lever.hunt_context());
        let outcome = hunter.hunt().await?;
        Ok(outcome.bitmap)
    }

    /// Loads through the dispatcher and waits for the bitmap. Unlike
    /// [`get`](Self::get), the load is scheduled by priority, joins hunts for
    /// the same key and fills the memory cache.
    ///
    /// # Errors
    /// Returns a configuration error, the load failure, or
    /// [`LeverError::Shutdown`] when the pipeline stops before delivering.
    pub async fn load(self) -> LeverResult<Bitmap> {
        if !self.builder.has_image() {
            return Err(LeverError::illegal_state("Request has no image source."));
        }
        let slot = Arc::new(LoadSlot::default());
        let (sender, receiver) = oneshot::channel();
        let notifier = Arc::new(LoadNotifier {
            slot: slot.clone(),
            sender: Mutex::new(Some(sender)),
        });
        let target: Arc<dyn RemoteTarget> = slot;
        self.into_remote(&target, Some(notifier))?;
        receiver.await.map_err(|_| LeverError::Shutdown)?
    }

    /// Warms the memory cache. Defaults to low priority.
    ///
    /// # Errors
    /// Returns a configuration error or [`LeverError::Shutdown`].
    pub fn fetch(mut self, callback: Option<Arc<dyn Callback>>) -> LeverResult<()> {
        self.lever.ensure_running()?;
        if !self.builder.has_image() {
            return Ok(());
        }
        if !self.builder.has_priority() {
            self.builder = self.builder.priority(Priority::Low)?;
        }
        let lever = self.lever.clone();
        let params = self.into_params()?;
        lever.handlers().require(&params.request)?;

        if params.memory_policy.should_read_from_memory_cache()
            && lever.quick_memory_cache_check(&params.key).is_some()
        {
            lifecycle!(
                lever.is_logging_enabled(),
                request = %params.request.log_id(),
                "Completed from memory"
            );
            if let Some(callback) = callback {
                callback.on_success();
            }
            return Ok(());
        }

        lever.enqueue_and_submit(Action::fetch(params, callback));
        Ok(())
    }

    /// Delivers the image to a target held weakly by the pipeline.
    ///
    /// Any earlier request for the same target is cancelled. A memory hit is
    /// delivered before this returns.
    ///
    /// # Errors
    /// Returns a configuration error or [`LeverError::Shutdown`].
    pub fn into_target(self, target: &Arc<dyn Target>) -> LeverResult<()> {
        self.lever.ensure_running()?;
        let lever = self.lever.clone();
        let consumer = ConsumerId::of(target);
        let prepare = self.set_placeholder;
        let placeholder = self.placeholder.clone();

        if !self.builder.has_image() {
            lever.cancel_existing(consumer);
            if prepare {
                target.on_prepare_load(placeholder);
            }
            return Ok(());
        }

        let params = self.into_params()?;
        lever.handlers().require(&params.request)?;

        if params.memory_policy.should_read_from_memory_cache()
            && let Some(bitmap) = lever.quick_memory_cache_check(&params.key)
        {
            lever.cancel_existing(consumer);
            lifecycle!(
                lever.is_logging_enabled(),
                request = %params.request.log_id(),
                "Completed from memory"
            );
            target.on_bitmap_loaded(bitmap, LoadedFrom::Memory);
            return Ok(());
        }

        if prepare {
            target.on_prepare_load(placeholder);
        }
        lever.enqueue_and_submit(Action::target(params, target));
        Ok(())
    }

    /// Delivers the image to a remote surface. The callback, if any, is held
    /// strongly until the request finishes.
    ///
    /// # Errors
    /// Returns a configuration error or [`LeverError::Shutdown`].
    pub fn into_remote(
        self,
        target: &Arc<dyn RemoteTarget>,
        callback: Option<Arc<dyn Callback>>,
    ) -> LeverResult<()> {
        self.lever.ensure_running()?;
        let lever = self.lever.clone();

        if !self.builder.has_image() {
            lever.cancel_existing(ConsumerId::of(target));
            return Ok(());
        }

        let params = self.into_params()?;
        lever.handlers().require(&params.request)?;

        if params.memory_policy.should_read_from_memory_cache()
            && let Some(bitmap) = lever.quick_memory_cache_check(&params.key)
        {
            lever.cancel_existing(ConsumerId::of(target));
            target.apply(bitmap);
            if let Some(callback) = callback {
                callback.on_success();
            }
            return Ok(());
        }

        lever.enqueue_and_submit(Action::remote(params, target, callback));
        Ok(())
    }

    fn into_params(self) -> LeverResult<ActionParams> {
        let request = self.lever.create_request(self.builder)?;
        let key = create_key(&request);
        Ok(ActionParams {
            request,
            key,
            memory_policy: self.memory_policy,
            network_policy: self.network_policy,
            tag: self.tag,
            error_placeholder: self.error_placeholder,
        })
    }
}
