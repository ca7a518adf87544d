//! Application layer: the request pipeline and its public facade.

mod lever;
/// Actions, hunts and the dispatcher.
pub mod pipeline;
/// Fluent request construction.
pub mod use_cases;

pub use lever::{Lever, LeverBuilder};
pub use use_cases::RequestCreator;
