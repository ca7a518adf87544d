//! Immutable description of what to load and how to transform it.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::errors::{LeverError, LeverResult};
use crate::domain::ports::Transformation;

/// Requests older than this are logged in seconds rather than milliseconds.
const TOO_LONG_LOG: Duration = Duration::from_secs(5);

/// Scheduling priority. Variants are ordered from lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work such as prefetching.
    Low,
    /// Regular requests.
    #[default]
    Normal,
    /// Work the user is waiting on.
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for Priority {
    type Err = LeverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(LeverError::invalid_argument(format!(
                "Unknown priority: {other}"
            ))),
        }
    }
}

/// Alignment used when center cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CropGravity {
    /// Keep the middle of the image.
    #[default]
    Center,
    /// Keep the leading (left) edge.
    Start,
    /// Keep the trailing (right) edge.
    End,
    /// Keep the top edge.
    Top,
    /// Keep the bottom edge.
    Bottom,
}

impl std::fmt::Display for CropGravity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Center => write!(f, "center"),
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
            Self::Top => write!(f, "top"),
            Self::Bottom => write!(f, "bottom"),
        }
    }
}

/// Preferred pixel layout of the decoded bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitmapConfig {
    /// 8-bit grayscale.
    Luma8,
    /// 8-bit RGB without alpha.
    Rgb8,
    /// 8-bit RGBA.
    Rgba8,
}

impl std::fmt::Display for BitmapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Luma8 => write!(f, "luma8"),
            Self::Rgb8 => write!(f, "rgb8"),
            Self::Rgba8 => write!(f, "rgba8"),
        }
    }
}

/// Identifies the image source. Exactly one kind is present per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLocator {
    /// A URI such as `https://`, `file://`, `content://` or `android.resource://`.
    Uri(Url),
    /// A bundled resource id.
    Resource(u32),
    /// Encoded image bytes already in memory.
    Bytes(Bytes),
}

impl ImageLocator {
    /// Returns the URI if this locator is one.
    #[must_use]
    pub const fn uri(&self) -> Option<&Url> {
        match self {
            Self::Uri(uri) => Some(uri),
            _ => None,
        }
    }

    /// Returns the resource id if this locator is one.
    #[must_use]
    pub const fn resource_id(&self) -> Option<u32> {
        match self {
            Self::Resource(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the URI scheme, if any.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.uri().map(Url::scheme)
    }
}

/// Immutable image request.
#[derive(Clone)]
pub struct Request {
    id: u64,
    started: Instant,
    locator: ImageLocator,
    stable_key: Option<String>,
    transformations: Vec<Arc<dyn Transformation>>,
    target_width: u32,
    target_height: u32,
    center_crop: bool,
    center_crop_gravity: CropGravity,
    center_inside: bool,
    only_scale_down: bool,
    rotation_degrees: f32,
    rotation_pivot: Option<(f32, f32)>,
    purgeable: bool,
    config: Option<BitmapConfig>,
    priority: Priority,
}

impl Request {
    /// Starts a builder for the given locator.
    #[must_use]
    pub fn builder(locator: ImageLocator) -> RequestBuilder {
        RequestBuilder::new(locator)
    }

    /// Returns a builder pre-filled with this request's fields.
    #[must_use]
    pub fn build_upon(&self) -> RequestBuilder {
        RequestBuilder::from(self)
    }

    /// Copies the sequence id and start time of `original` onto this request.
    #[must_use]
    pub fn with_identity_of(mut self, original: &Self) -> Self {
        self.id = original.id;
        self.started = original.started;
        self
    }

    pub(crate) fn assign_identity(&mut self, id: u64, started: Instant) {
        self.id = id;
        self.started = started;
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn started(&self) -> Instant {
        self.started
    }

    #[must_use]
    pub const fn locator(&self) -> &ImageLocator {
        &self.locator
    }

    #[must_use]
    pub const fn uri(&self) -> Option<&Url> {
        self.locator.uri()
    }

    #[must_use]
    pub fn stable_key(&self) -> Option<&str> {
        self.stable_key.as_deref()
    }

    #[must_use]
    pub fn transformations(&self) -> &[Arc<dyn Transformation>] {
        &self.transformations
    }

    #[must_use]
    pub const fn target_width(&self) -> u32 {
        self.target_width
    }

    #[must_use]
    pub const fn target_height(&self) -> u32 {
        self.target_height
    }

    #[must_use]
    pub const fn center_crop(&self) -> bool {
        self.center_crop
    }

    #[must_use]
    pub const fn center_crop_gravity(&self) -> CropGravity {
        self.center_crop_gravity
    }

    #[must_use]
    pub const fn center_inside(&self) -> bool {
        self.center_inside
    }

    #[must_use]
    pub const fn only_scale_down(&self) -> bool {
        self.only_scale_down
    }

    #[must_use]
    pub const fn rotation_degrees(&self) -> f32 {
        self.rotation_degrees
    }

    #[must_use]
    pub const fn rotation_pivot(&self) -> Option<(f32, f32)> {
        self.rotation_pivot
    }

    #[must_use]
    pub const fn purgeable(&self) -> bool {
        self.purgeable
    }

    #[must_use]
    pub const fn config(&self) -> Option<BitmapConfig> {
        self.config
    }

    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub const fn has_size(&self) -> bool {
        self.target_width != 0 || self.target_height != 0
    }

    #[must_use]
    pub fn needs_matrix_transform(&self) -> bool {
        self.has_size() || self.rotation_degrees != 0.0
    }

    #[must_use]
    pub fn has_custom_transformations(&self) -> bool {
        !self.transformations.is_empty()
    }

    #[must_use]
    pub fn needs_transformation(&self) -> bool {
        self.needs_matrix_transform() || self.has_custom_transformations() || self.config.is_some()
    }

    /// Short id used in log lines, e.g. `[R12]`.
    #[must_use]
    pub fn plain_id(&self) -> String {
        format!("[R{}]", self.id)
    }

    /// Id plus elapsed time since the request started, e.g. `[R12]+35ms`.
    #[must_use]
    pub fn log_id(&self) -> String {
        let delta = self.started.elapsed();
        if delta > TOO_LONG_LOG {
            format!("{}+{}s", self.plain_id(), delta.as_secs())
        } else {
            format!("{}+{}ms", self.plain_id(), delta.as_millis())
        }
    }

    /// Human-readable source name.
    #[must_use]
    pub fn name(&self) -> String {
        match &self.locator {
            ImageLocator::Uri(uri) => uri.path().to_string(),
            ImageLocator::Resource(id) => format!("{id:x}"),
            ImageLocator::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request{{")?;
        match &self.locator {
            ImageLocator::Uri(uri) => write!(f, "{uri}")?,
            ImageLocator::Resource(id) => write!(f, "{id}")?,
            ImageLocator::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len())?,
        }
        for transformation in &self.transformations {
            write!(f, " {}", transformation.key())?;
        }
        if let Some(stable_key) = &self.stable_key {
            write!(f, " stableKey({stable_key})")?;
        }
        if self.has_size() {
            write!(f, " resize({},{})", self.target_width, self.target_height)?;
        }
        if self.center_crop {
            write!(f, " centerCrop")?;
        }
        if self.center_inside {
            write!(f, " centerInside")?;
        }
        if self.rotation_degrees != 0.0 {
            write!(f, " rotation({}", self.rotation_degrees)?;
            if let Some((x, y)) = self.rotation_pivot {
                write!(f, " @ {x},{y}")?;
            }
            write!(f, ")")?;
        }
        if self.purgeable {
            write!(f, " purgeable")?;
        }
        if let Some(config) = self.config {
            write!(f, " {config}")?;
        }
        write!(f, "}}")
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {self}", self.plain_id())
    }
}

/// Fluent builder for [`Request`].
///
/// Setters that can conflict with earlier calls return `Err` immediately, so a
/// misconfigured chain fails at the call that introduced the conflict.
#[derive(Clone)]
pub struct RequestBuilder {
    locator: Option<ImageLocator>,
    stable_key: Option<String>,
    transformations: Vec<Arc<dyn Transformation>>,
    target_width: u32,
    target_height: u32,
    center_crop: bool,
    center_crop_gravity: CropGravity,
    center_inside: bool,
    only_scale_down: bool,
    rotation_degrees: f32,
    rotation_pivot: Option<(f32, f32)>,
    purgeable: bool,
    config: Option<BitmapConfig>,
    priority: Option<Priority>,
}

impl RequestBuilder {
    /// Creates a builder for the given locator.
    #[must_use]
    pub fn new(locator: ImageLocator) -> Self {
        Self {
            locator: Some(locator),
            ..Self::empty()
        }
    }

    /// Creates a builder without an image source. Such a builder can still be
    /// configured but never builds.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            locator: None,
            stable_key: None,
            transformations: Vec::new(),
            target_width: 0,
            target_height: 0,
            center_crop: false,
            center_crop_gravity: CropGravity::Center,
            center_inside: false,
            only_scale_down: false,
            rotation_degrees: 0.0,
            rotation_pivot: None,
            purgeable: false,
            config: None,
            priority: None,
        }
    }

    /// Replaces the locator.
    #[must_use]
    pub fn locator(mut self, locator: ImageLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    #[must_use]
    pub const fn has_image(&self) -> bool {
        self.locator.is_some()
    }

    #[must_use]
    pub const fn has_size(&self) -> bool {
        self.target_width != 0 || self.target_height != 0
    }

    #[must_use]
    pub const fn has_priority(&self) -> bool {
        self.priority.is_some()
    }

    /// Overrides the identity used for cache keys.
    #[must_use]
    pub fn stable_key(mut self, stable_key: impl Into<String>) -> Self {
        self.stable_key = Some(stable_key.into());
        self
    }

    /// Resizes to the given dimensions; one of them may be zero to keep the
    /// aspect ratio.
    ///
    /// # Errors
    /// Returns an argument error if both dimensions are zero.
    pub fn resize(mut self, target_width: u32, target_height: u32) -> LeverResult<Self> {
        if target_width == 0 && target_height == 0 {
            return Err(LeverError::invalid_argument(
                "At least one dimension has to be positive number.",
            ));
        }
        self.target_width = target_width;
        self.target_height = target_height;
        Ok(self)
    }

    /// Removes any resize, crop and inside settings.
    #[must_use]
    pub fn clear_resize(mut self) -> Self {
        self.target_width = 0;
        self.target_height = 0;
        self.center_crop = false;
        self.center_inside = false;
        self
    }

    /// Crops to fill the requested bounds.
    ///
    /// # Errors
    /// Returns a state error if center-inside was already requested.
    pub fn center_crop(mut self, gravity: CropGravity) -> LeverResult<Self> {
        if self.center_inside {
            return Err(LeverError::illegal_state(
                "Center crop can not be used after calling centerInside",
            ));
        }
        self.center_crop = true;
        self.center_crop_gravity = gravity;
        Ok(self)
    }

    #[must_use]
    pub fn clear_center_crop(mut self) -> Self {
        self.center_crop = false;
        self.center_crop_gravity = CropGravity::Center;
        self
    }

    /// Scales to fit inside the requested bounds.
    ///
    /// # Errors
    /// Returns a state error if center-crop was already requested.
    pub fn center_inside(mut self) -> LeverResult<Self> {
        if self.center_crop {
            return Err(LeverError::illegal_state(
                "Center inside can not be used after calling centerCrop",
            ));
        }
        self.center_inside = true;
        Ok(self)
    }

    #[must_use]
    pub fn clear_center_inside(mut self) -> Self {
        self.center_inside = false;
        self
    }

    /// Only resize when the source is larger than the target.
    ///
    /// # Errors
    /// Returns a state error if no resize was requested.
    pub fn only_scale_down(mut self) -> LeverResult<Self> {
        if !self.has_size() {
            return Err(LeverError::illegal_state(
                "onlyScaleDown can not be applied without resize",
            ));
        }
        self.only_scale_down = true;
        Ok(self)
    }

    #[must_use]
    pub fn clear_only_scale_down(mut self) -> Self {
        self.only_scale_down = false;
        self
    }

    /// Rotates around the image center.
    #[must_use]
    pub fn rotate(mut self, degrees: f32) -> Self {
        self.rotation_degrees = degrees;
        self.rotation_pivot = None;
        self
    }

    /// Rotates around the given pivot.
    #[must_use]
    pub fn rotate_about(mut self, degrees: f32, pivot_x: f32, pivot_y: f32) -> Self {
        self.rotation_degrees = degrees;
        self.rotation_pivot = Some((pivot_x, pivot_y));
        self
    }

    #[must_use]
    pub fn clear_rotation(mut self) -> Self {
        self.rotation_degrees = 0.0;
        self.rotation_pivot = None;
        self
    }

    #[must_use]
    pub fn purgeable(mut self) -> Self {
        self.purgeable = true;
        self
    }

    #[must_use]
    pub fn config(mut self, config: BitmapConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the scheduling priority.
    ///
    /// # Errors
    /// Returns a state error if the priority was already set.
    pub fn priority(mut self, priority: Priority) -> LeverResult<Self> {
        if self.priority.is_some() {
            return Err(LeverError::illegal_state("Priority already set."));
        }
        self.priority = Some(priority);
        Ok(self)
    }

    /// Appends a custom transformation.
    ///
    /// # Errors
    /// Returns an argument error if the transformation key is empty.
    pub fn transform(mut self, transformation: Arc<dyn Transformation>) -> LeverResult<Self> {
        if transformation.key().is_empty() {
            return Err(LeverError::invalid_argument(
                "Transformation key must not be empty.",
            ));
        }
        self.transformations.push(transformation);
        Ok(self)
    }

    /// Validates and builds the request.
    ///
    /// # Errors
    /// Returns a state error when there is no image source, or when
    /// crop/inside settings lack a resize or conflict with each other.
    pub fn build(self) -> LeverResult<Request> {
        let has_size = self.has_size();
        let Some(locator) = self.locator else {
            return Err(LeverError::illegal_state("Request has no image source."));
        };
        if self.center_inside && self.center_crop {
            return Err(LeverError::illegal_state(
                "Center crop and center inside can not be used together.",
            ));
        }
        if self.center_crop && !has_size {
            return Err(LeverError::illegal_state(
                "Center crop requires calling resize with positive width and height.",
            ));
        }
        if self.center_inside && !has_size {
            return Err(LeverError::illegal_state(
                "Center inside requires calling resize with positive width and height.",
            ));
        }
        Ok(Request {
            id: 0,
            started: Instant::now(),
            locator,
            stable_key: self.stable_key,
            transformations: self.transformations,
            target_width: self.target_width,
            target_height: self.target_height,
            center_crop: self.center_crop,
            center_crop_gravity: self.center_crop_gravity,
            center_inside: self.center_inside,
            only_scale_down: self.only_scale_down,
            rotation_degrees: self.rotation_degrees,
            rotation_pivot: self.rotation_pivot,
            purgeable: self.purgeable,
            config: self.config,
            priority: self.priority.unwrap_or_default(),
        })
    }
}

impl From<&Request> for RequestBuilder {
    fn from(request: &Request) -> Self {
        Self {
            locator: Some(request.locator.clone()),
            stable_key: request.stable_key.clone(),
            transformations: request.transformations.clone(),
            target_width: request.target_width,
            target_height: request.target_height,
            center_crop: request.center_crop,
            center_crop_gravity: request.center_crop_gravity,
            center_inside: request.center_inside,
            only_scale_down: request.only_scale_down,
            rotation_degrees: request.rotation_degrees,
            rotation_pivot: request.rotation_pivot,
            purgeable: request.purgeable,
            config: request.config,
            priority: Some(request.priority),
        }
    }
}
