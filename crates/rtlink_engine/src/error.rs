//! Error types for the realtime client.

use crate::config::ConfigError;
use rtlink_protocol::ProtocolError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Why an HTTP request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFailureKind {
    /// The request never got a response.
    Network,
    /// The request timed out.
    Timeout,
    /// The server answered with a non-2xx status.
    Status(u16),
    /// No URL or token is configured.
    NoEndpoint,
}

impl std::fmt::Display for RequestFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestFailureKind::Network => f.write_str("network error"),
            RequestFailureKind::Timeout => f.write_str("timeout"),
            RequestFailureKind::Status(status) => write!(f, "status {status}"),
            RequestFailureKind::NoEndpoint => f.write_str("no url or token"),
        }
    }
}

/// Errors that can occur while coordinating delivery.
///
/// Cloneable so that every caller joined on a shared operation observes the
/// same failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The push transport could not be opened or refused a request.
    #[error("push transport unavailable: {0}")]
    TransportUnavailable(String),

    /// An HTTP request on the fallback path failed.
    #[error("request to {path} failed ({kind}): {message}")]
    RequestFailed {
        /// API path of the request.
        path: String,
        /// Failure classification.
        kind: RequestFailureKind,
        /// Error message.
        message: String,
    },

    /// The operation exists in the API but is not implemented.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    /// No push transport is open.
    #[error("not connected to the push server")]
    NotConnected,

    /// The client is offline; the request was buffered for later replay.
    #[error("client is offline, request buffered")]
    Offline,

    /// The operation was superseded by a disconnect.
    #[error("operation cancelled")]
    Cancelled,

    /// A server payload could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportUnavailable(message.into())
    }

    /// Creates a request failure.
    pub fn request(path: impl Into<String>, kind: RequestFailureKind, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    /// Returns true if retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::TransportUnavailable(_) => true,
            ClientError::RequestFailed { kind, .. } => match kind {
                RequestFailureKind::Network | RequestFailureKind::Timeout => true,
                RequestFailureKind::Status(status) => *status >= 500,
                RequestFailureKind::NoEndpoint => false,
            },
            _ => false,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ClientError::transport("socket closed").is_retryable());
        assert!(ClientError::request("pull", RequestFailureKind::Timeout, "slow").is_retryable());
        assert!(ClientError::request("pull", RequestFailureKind::Status(503), "busy").is_retryable());
        assert!(!ClientError::request("pull", RequestFailureKind::Status(403), "nope").is_retryable());
        assert!(!ClientError::NotImplemented("leave").is_retryable());
        assert!(!ClientError::Cancelled.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ClientError::NotConnected;
        assert_eq!(err.to_string(), "not connected to the push server");

        let err = ClientError::request("pull", RequestFailureKind::Status(500), "boom");
        assert!(err.to_string().contains("pull"));
        assert!(err.to_string().contains("500"));

        let err: ClientError = ProtocolError::Malformed("no rooms".into()).into();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
