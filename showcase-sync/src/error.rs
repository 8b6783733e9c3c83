//! Error types for the sync layer.

use showcase_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error (unreachable host, dropped connection).
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with an error status.
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Data failed structural validation.
    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    /// Data failed the integrity check.
    #[error("integrity check failed: {}", .0.join(", "))]
    Integrity(Vec<String>),

    /// No conflict resolution strategy registered under this name.
    #[error("no resolution strategy found for: {0}")]
    UnknownStrategy(String),

    /// A strategy could not reconcile the two values.
    #[error("conflict resolution failed: {0}")]
    Conflict(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// All retry attempts failed.
    #[error("operation failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// A state machine was asked to make an illegal move.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Data is stale or outdated.
    #[error("stale data: {0}")]
    Stale(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// A stable name for the error class.
    ///
    /// Together with the display message it forms the signature the error
    /// recovery manager counts attempts against.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Network(_) => "NetworkError",
            SyncError::Remote { .. } => "RemoteError",
            SyncError::Auth(_) => "AuthError",
            SyncError::Validation(_) => "ValidationError",
            SyncError::Integrity(_) => "IntegrityError",
            SyncError::UnknownStrategy(_) => "UnknownStrategyError",
            SyncError::Conflict(_) => "ConflictError",
            SyncError::Storage(_) => "StorageError",
            SyncError::Serialization(_) => "SerializationError",
            SyncError::Timeout => "TimeoutError",
            SyncError::RetryExhausted { .. } => "RetryError",
            SyncError::InvalidTransition(_) => "TransitionError",
            SyncError::Stale(_) => "StaleDataError",
            SyncError::ChannelClosed => "ChannelClosedError",
            SyncError::Config(_) => "ConfigError",
        }
    }

    /// `(kind, message)` signature used to bound recovery attempts.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{}_{}", self.kind(), self)
    }

    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout => true,
            SyncError::Remote { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout
        } else {
            SyncError::Network(e.to_string())
        }
    }
}
