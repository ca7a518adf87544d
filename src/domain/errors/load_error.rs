//! Errors raised while loading an image.

use thiserror::Error;

/// Failure of a single load attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("HTTP {code}")]
    Response { code: u16, offline: bool },

    #[error("received response with 0 content-length header")]
    ContentLength,

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("image not found: {message}")]
    NotFound { message: String },

    #[error("unrecognized type of request: {request}")]
    UnrecognizedRequest { request: String },

    #[error("load panicked: {message}")]
    Panicked { message: String },
}

impl LoadError {
    /// Creates an I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates the error reported when a handler or decoder panics.
    #[must_use]
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Panicked { message }
    }

    /// Returns whether another attempt may succeed.
    ///
    /// A 504 for an offline-only request means the disk cache had no entry,
    /// which no retry can fix.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Response { offline, .. } => !*offline,
            Self::ContentLength | Self::Io { .. } | Self::Network { .. } => true,
            Self::Decode { .. }
            | Self::NotFound { .. }
            | Self::UnrecognizedRequest { .. }
            | Self::Panicked { .. } => false,
        }
    }

    /// Returns whether this is the zero-length disk replay condition.
    #[must_use]
    pub const fn is_content_length(&self) -> bool {
        matches!(self, Self::ContentLength)
    }
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::not_found(e.to_string())
        } else {
            Self::io(e.to_string())
        }
    }
}

impl From<image::ImageError> for LoadError {
    fn from(e: image::ImageError) -> Self {
        Self::decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(LoadError::ContentLength, true ; "zero_length_replay")]
    #[test_case(LoadError::io("reset"), true ; "io")]
    #[test_case(LoadError::network("timeout"), true ; "network")]
    #[test_case(LoadError::Response { code: 500, offline: false }, true ; "server_error")]
    #[test_case(LoadError::Response { code: 504, offline: true }, false ; "offline_cache_miss")]
    #[test_case(LoadError::decode("bad header"), false ; "decode")]
    #[test_case(LoadError::not_found("gone"), false ; "not_found")]
    #[test_case(LoadError::Panicked { message: "boom".into() }, false ; "panicked")]
    fn test_transient_classification(error: LoadError, transient: bool) {
        assert_eq!(error.is_transient(), transient);
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err: LoadError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, LoadError::NotFound { .. }));

        let err: LoadError = std::io::Error::other("boom").into();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_panicked_keeps_payload_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("handler exploded");
        assert_eq!(
            LoadError::panicked(payload.as_ref()),
            LoadError::Panicked {
                message: "handler exploded".into()
            }
        );

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(LoadError::panicked(payload.as_ref()).to_string(), "load panicked: owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(
            LoadError::panicked(payload.as_ref()).to_string(),
            "load panicked: unknown panic"
        );
    }
}
