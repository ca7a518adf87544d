//! Consumer contracts for delivered images.
//!
//! The pipeline holds consumers weakly; once the last strong reference is
//! dropped, deliveries to it are skipped.

use crate::domain::entities::{Bitmap, LoadedFrom};
use crate::domain::errors::LoadError;

/// A consumer that displays a bitmap, such as a widget.
pub trait Target: Send + Sync {
    /// Called once with the final bitmap.
    fn on_bitmap_loaded(&self, bitmap: Bitmap, from: LoadedFrom);

    /// Called once when the load failed.
    fn on_bitmap_failed(&self, error: &LoadError, error_placeholder: Option<Bitmap>);

    /// Called before the request is dispatched.
    fn on_prepare_load(&self, placeholder: Option<Bitmap>);
}

/// Completion callback for fetches and remote deliveries.
///
/// Callbacks are held strongly, so they must not capture anything whose
/// lifetime the caller expects the pipeline to end.
pub trait Callback: Send + Sync {
    fn on_success(&self);

    fn on_error(&self, error: &LoadError);
}

/// A consumer living outside the process, such as a notification or a
/// home-screen widget, updated by pushing the bitmap to it.
pub trait RemoteTarget: Send + Sync {
    /// Applies the bitmap to the remote surface.
    fn apply(&self, bitmap: Bitmap);

    /// Applies the error placeholder, if the caller configured one.
    fn apply_error(&self, error_placeholder: Option<Bitmap>);
}
