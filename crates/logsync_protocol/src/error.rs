//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while parsing wire values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A timestamp string was not `<seconds>[.<fraction>]`.
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// An unknown `order` value.
    #[error("invalid order '{0}', expected 'asc' or 'desc'")]
    InvalidOrder(String),

    /// An unknown `encoding` value.
    #[error("invalid encoding '{0}', expected 'base64' or 'utf-8'")]
    InvalidEncoding(String),

    /// A JSON body could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A payload was not valid base64.
    #[error("payload decode error: {0}")]
    Payload(#[from] base64::DecodeError),
}
