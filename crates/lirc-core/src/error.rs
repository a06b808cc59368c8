//! Error types for lircd communication

use std::time::Duration;
use thiserror::Error;

/// Result type for lircd operations
pub type Result<T> = std::result::Result<T, LircError>;

/// lircd client error types
#[derive(Debug, Error)]
pub enum LircError {
    /// Dial, read, write or flush failure
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Connection was closed deliberately or lost
    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed reply framing
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Malformed broadcast line
    #[error("Invalid broadcast event: {0}")]
    InvalidEvent(String),

    /// lircd answered with ERROR
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    /// No reply within the configured timeout
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    /// Unusable configuration value
    #[error("Config error: {0}")]
    ConfigError(String),
}

impl LircError {
    /// Whether the error means the connection is no longer usable
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            LircError::ConnectionError(_) | LircError::ConnectionClosed
        )
    }
}
