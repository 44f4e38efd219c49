//! Error types for the contempt client.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Gateway connection failed.
    #[error("gateway connection failed: {0}")]
    GatewayConnection(String),

    /// The socket could not be opened or HELLO never arrived.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// No HELLO within the configured timeout.
    #[error("no HELLO received within {0:?}")]
    HelloTimeout(Duration),

    /// The remote rejected the token.
    #[error("authentication failed (close code {code}): {reason}")]
    AuthenticationFailed {
        /// Close code sent by the server.
        code: u16,
        /// Close reason sent by the server.
        reason: String,
    },

    /// Session could not be established or continued.
    #[error("session error: {0}")]
    Session(String),

    /// Operation needs a live connection.
    #[error("not connected")]
    NotConnected,

    /// Socket read/write failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A 429 persisted after the single permitted retry.
    #[error("rate limited on {bucket}, retry after {retry_after:?}")]
    RateLimited {
        /// Bucket key.
        bucket: String,
        /// Server-provided delay.
        retry_after: Duration,
    },

    /// Non-success HTTP status, body included verbatim.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Request could not be sent or its response could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A paginated load is already running.
    #[error("a history load is already in progress")]
    LoadInProgress,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] contempt_proto::ProtoError),

    /// Invalid URL.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether retrying the same operation can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::GatewayConnection(_)
            | Self::ConnectFailed(_)
            | Self::HelloTimeout(_)
            | Self::Session(_)
            | Self::Transport(_)
            | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            Self::AuthenticationFailed { .. }
            | Self::NotConnected
            | Self::LoadInProgress
            | Self::Config(_)
            | Self::Io(_)
            | Self::Protocol(_)
            | Self::Url(_)
            | Self::Json(_) => false,
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_authentication_failed_display() {
        let err = ClientError::AuthenticationFailed {
            code: 4004,
            reason: "Authentication failed.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "authentication failed (close code 4004): Authentication failed."
        );
    }

    #[test]
    fn test_http_display_is_verbatim() {
        let err = ClientError::Http {
            status: 403,
            body: r#"{"message": "Missing Access", "code": 50001}"#.to_string(),
        };
        assert!(err.to_string().contains("Missing Access"));
        assert!(err.to_string().starts_with("HTTP 403"));
    }

    #[test_case(ClientError::Transport("reset".into()), true ; "transport")]
    #[test_case(ClientError::Session("rejected".into()), true ; "session")]
    #[test_case(ClientError::Http { status: 502, body: String::new() }, true ; "server error")]
    #[test_case(ClientError::Http { status: 404, body: String::new() }, false ; "client error")]
    #[test_case(ClientError::AuthenticationFailed { code: 4004, reason: String::new() }, false ; "auth")]
    #[test_case(ClientError::Config("bad".into()), false ; "config")]
    fn test_is_retryable(err: ClientError, expected: bool) {
        assert_eq!(err.is_retryable(), expected);
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err: ClientError = contempt_proto::ProtoError::InvalidOpcode(5).into();
        assert!(err.to_string().contains("invalid opcode: 5"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ClientError = io_err.into();
        assert!(err.to_string().contains("io error"));
    }
}
