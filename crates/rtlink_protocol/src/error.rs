//! Protocol error types.

use thiserror::Error;

/// Result type for protocol decoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding server payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The payload was not valid JSON or did not match the expected shape.
    #[error("invalid json payload: {0}")]
    Json(String),

    /// The payload was valid JSON but missing a required part.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
