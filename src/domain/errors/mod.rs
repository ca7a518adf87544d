//! Domain error types.

mod lever_error;
mod load_error;

pub use lever_error::{LeverError, LeverResult};
pub use load_error::LoadError;
