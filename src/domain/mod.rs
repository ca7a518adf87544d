//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{Bitmap, LoadedFrom, MemoryPolicy, NetworkPolicy, Priority, Request};
pub use errors::{LeverError, LeverResult, LoadError};
