//! Lever - an asynchronous image loading pipeline.
//!
//! Requests are de-duplicated by cache key, scheduled on a priority executor,
//! loaded through a chain of request handlers, transformed, cached in memory
//! and delivered to weakly held targets.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the pipeline and its facade.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, handlers, and the executor.
pub mod infrastructure;

pub use application::{Lever, LeverBuilder, RequestCreator};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "lever";
