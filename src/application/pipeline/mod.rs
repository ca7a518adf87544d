//! Request pipeline: actions, hunts and the dispatcher actor that joins them.

/// Logs a request lifecycle event at debug when verbose logging is enabled,
/// otherwise at trace.
macro_rules! lifecycle {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::debug!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    };
}

pub(crate) use lifecycle;

mod action;
mod dispatcher;
mod handler_chain;
mod hunter;
mod transform;

pub use action::{Action, ActionKind, ActionParams, ConsumerId, TargetRegistry};
pub use dispatcher::{Dispatcher, DispatcherCommand, DispatcherConfig, DispatcherHandle};
pub use handler_chain::{BuiltInHandlers, RequestHandlerChain};
pub use hunter::{Attach, Detach, HuntContext, HuntOutcome, Hunter};
pub use transform::{apply_transformations, transform_bitmap};

#[cfg(test)]
pub(crate) mod test_support;
