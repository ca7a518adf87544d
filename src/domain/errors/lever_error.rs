//! Caller-facing error types.

use thiserror::Error;

use super::LoadError;

/// Errors surfaced synchronously to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum LeverError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("illegal state: {message}")]
    IllegalState { message: String },

    #[error("no request handler can load {request}")]
    NoHandler { request: String },

    #[error("lever instance already shut down")]
    Shutdown,

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl LeverError {
    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an illegal state error.
    #[must_use]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Returns whether this is a configuration error rather than a load failure.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. } | Self::IllegalState { .. } | Self::NoHandler { .. }
        )
    }
}

/// Result alias for caller-facing operations.
pub type LeverResult<T> = Result<T, LeverError>;
