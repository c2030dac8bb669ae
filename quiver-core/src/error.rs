//! Error types for Quiver operations

use thiserror::Error;
use uuid::Uuid;

/// Record store and optimistic overlay errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Backend {backend} failed: {reason}")]
    Backend { backend: String, reason: String },

    #[error("Optimistic layer not found: {version}")]
    UnknownLayer { version: Uuid },
}

/// Errors raised while reading a response through the field schema.
///
/// A decode error is fatal for the operation: nothing read during the
/// failing pass is committed to the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Non-optional field {path} was null")]
    NullField { path: String },

    #[error("Non-optional field {path} is missing")]
    MissingField { path: String },

    #[error("Expected {expected} at {path}")]
    UnexpectedShape { path: String, expected: String },

    #[error("Invalid {scalar} value at {path}: {reason}")]
    InvalidScalar {
        scalar: String,
        path: String,
        reason: String,
    },

    #[error("Variable ${name} is not defined")]
    UnresolvedVariable { name: String },

    #[error("Failed to map data for {operation}: {reason}")]
    DataMapping { operation: String, reason: String },
}

/// Connectivity or HTTP-level failures reported by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport has been disposed")]
    Disposed,
}

/// The transport returned bytes that are not a protocol payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed response payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("Response payload has neither data nor errors")]
    EmptyPayload,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Quiver errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuiverError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Call was canceled")]
    Canceled,

    #[error("Interceptor failed: {reason}")]
    Interceptor { reason: String },
}

impl QuiverError {
    /// Shorthand for failures raised by user interceptors.
    pub fn interceptor(reason: impl Into<String>) -> Self {
        Self::Interceptor {
            reason: reason.into(),
        }
    }

    /// Whether the failure came from fetching or parsing a network response.
    ///
    /// These are the failures a network-first fetch recovers from by falling
    /// back to the cache.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, QuiverError::Transport(_) | QuiverError::Parse(_))
    }
}

/// Result type alias for Quiver operations.
pub type QuiverResult<T> = Result<T, QuiverError>;

// =============================================================================
// TESTS
// =============================================================================
