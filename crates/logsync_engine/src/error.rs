//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The collection does not exist.
    NotFound,
    /// The request parameters were rejected.
    InvalidRequest,
    /// Network, 5xx or malformed body.
    Transient,
    /// Local configuration is invalid.
    Config,
    /// The session was disposed.
    Disposed,
}

/// Errors that can occur during sync operations.
///
/// Fetch errors never escape the engine as `Err`: they are attached to the
/// emitted view next to the last known good messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Remote reported the collection as missing (HTTP 404).
    #[error("collection not found: {0}")]
    NotFound(String),

    /// Remote rejected the parameters (HTTP 4xx with a structured body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network failure, 5xx, timeout or an undecodable body.
    #[error("transient error: {0}")]
    Transient(String),

    /// Invalid local configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The session has been disposed.
    #[error("session disposed")]
    Disposed,
}

impl SyncError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            SyncError::Transient(_) => ErrorKind::Transient,
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::Disposed => ErrorKind::Disposed,
        }
    }

    /// Returns true if a later poll tick may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

impl From<logsync_protocol::ProtocolError> for SyncError {
    fn from(err: logsync_protocol::ProtocolError) -> Self {
        SyncError::Transient(format!("malformed response: {err}"))
    }
}
