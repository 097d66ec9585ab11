//! Error types for cache connection operations.

use std::io;
use thiserror::Error;

/// Errors that can occur while executing a command on a cache connection.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No transport is available: the last connect attempt failed and the
    /// connection is waiting out its backoff deadline.
    #[error("Connection offline")]
    ConnectionOffline,

    /// The transport failed while a request was outstanding.
    #[error("Connection lost: {0}")]
    ConnectionLost(#[from] io::Error),

    /// No response arrived within the read timeout.
    #[error("Operation timed out")]
    Timeout,

    /// The server reported an error, or the response stream was malformed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server broke a response contract the connection relies on.
    ///
    /// This is not a transient condition. The reply for the current command
    /// could not be interpreted and must not be retried blindly.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The connection has been shut down.
    #[error("Connection shut down")]
    Shutdown,

    /// The key cannot be sent over the text protocol.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type alias for cache connection operations.
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Create a new protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Check if this error means the server could not be reached.
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::ConnectionOffline | Self::ConnectionLost(_))
    }

    /// Check if this error is recoverable (transient).
    ///
    /// Recoverable errors leave the connection ready to try again on the
    /// next command.
    pub fn is_recoverable(&self) -> bool {
        self.is_offline() || matches!(self, Self::Timeout)
    }

    /// Check if this error is a fatal contract breach.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}
