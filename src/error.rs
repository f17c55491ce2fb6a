//! Error types for chat-realtime

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection rejected by server: {0}")]
    Rejected(String),

    #[error("Origin lookup failed: {0}")]
    Lookup(String),

    #[error("Account service error ({status}): {message}")]
    Account { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    /// Whether the reconnect policy may try again after this error.
    ///
    /// A handshake the server refused, or a configuration that can never
    /// produce a valid URL, will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChatError::Rejected(_) | ChatError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ChatError::Connection("refused".into()).is_retryable());
        assert!(ChatError::Timeout("handshake".into()).is_retryable());
        assert!(!ChatError::Rejected("unauthorized".into()).is_retryable());
        assert!(!ChatError::Config("bad scheme".into()).is_retryable());
    }
}
