//! Error types for log shipping.

use std::io;

use thiserror::Error;

use crate::types::IndexerKind;

/// Errors that can occur while shipping or retrieving build logs.
#[derive(Debug, Error)]
pub enum ShipError {
    /// A backend parameter is missing or invalid.
    #[error("configuration error: {reason}")]
    Configuration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// The backend could not be reached or the connection failed mid-request.
    #[error("{backend} transport error: {reason}")]
    Transport {
        /// The backend that failed.
        backend: IndexerKind,
        /// Description of the failure.
        reason: String,
        /// Whether the failure was a timeout.
        timed_out: bool,
    },

    /// The backend answered but signalled failure.
    #[error("{backend} protocol error: {reason}")]
    Protocol {
        /// The backend that rejected the request.
        backend: IndexerKind,
        /// Description of the rejection.
        reason: String,
    },

    /// The search backend answered with a non-success HTTP status.
    #[error("HTTP error code: {status}\nURI: {uri}\nRESPONSE: {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// The request target.
        uri: String,
        /// The response body, captured for diagnostics.
        body: String,
    },

    /// The operation is not available on this backend.
    #[error("destination does not support {operation}: {backend}")]
    Unsupported {
        /// The backend the operation was requested on.
        backend: IndexerKind,
        /// The requested operation.
        operation: &'static str,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification of a [`ShipError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad or missing backend parameters.
    Configuration,
    /// Network-level failure.
    Transport,
    /// The backend responded but signalled failure.
    Protocol,
    /// The operation is not supported by the backend.
    UnsupportedOperation,
}

impl ShipError {
    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(backend: IndexerKind, reason: impl Into<String>) -> Self {
        Self::Transport {
            backend,
            reason: reason.into(),
            timed_out: false,
        }
    }

    /// Creates a transport error caused by a timeout.
    pub fn timeout(backend: IndexerKind, reason: impl Into<String>) -> Self {
        Self::Transport {
            backend,
            reason: reason.into(),
            timed_out: true,
        }
    }

    /// Creates a protocol error.
    pub fn protocol(backend: IndexerKind, reason: impl Into<String>) -> Self {
        Self::Protocol {
            backend,
            reason: reason.into(),
        }
    }

    /// Returns the taxonomy class of this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration { .. } => ErrorClass::Configuration,
            Self::Transport { .. } => ErrorClass::Transport,
            Self::Protocol { .. } | Self::HttpStatus { .. } | Self::Serialization(_) => {
                ErrorClass::Protocol
            }
            Self::Unsupported { .. } => ErrorClass::UnsupportedOperation,
        }
    }
}

impl From<serde_json::Error> for ShipError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ShipError> for io::Error {
    fn from(err: ShipError) -> Self {
        let kind = match &err {
            ShipError::Unsupported { .. } => io::ErrorKind::Unsupported,
            ShipError::Transport {
                timed_out: true, ..
            } => io::ErrorKind::TimedOut,
            ShipError::Configuration { .. } => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}

/// Result type alias for shipping operations.
pub type Result<T> = std::result::Result<T, ShipError>;
