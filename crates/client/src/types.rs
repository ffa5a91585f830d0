//! Client error and handler result types.

use tether_protocol::SendError;

/// Result type for [`ClientHandler`](crate::handlers::ClientHandler)s.
pub type HandlerResult = Result<serde_json::Value, HandlerFailure>;

/// Refusal returned by a client-side handler.  Sent to the server as a
/// `RESPONSE` with `success = false`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct HandlerFailure {
    pub code: u16,
    pub message: String,
}

impl HandlerFailure {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }
}

/// Top-level client error.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("config: {0}")]
    Config(String),
    /// The server answered the request with `success = false`.
    #[error("remote error {code}: {message}")]
    Remote { code: u16, message: String },
    /// The session ended normally without a response.
    #[error("session closed before a response was received")]
    SessionClosed,
    /// The server broke the session protocol.  Never retried.
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("request delivery failed: {0}")]
    Send(#[from] SendError),
    #[error("shutdown")]
    Shutdown,
}
