//! Error types for delivery and retention operations.
//!
//! Errors carry enough context to produce the queue item's `error` column
//! and the delivery log entry. The poller never propagates per-item errors
//! out of a cycle; it records them and moves on.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions during webhook delivery and retention.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure. No HTTP response was obtained.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// HTTP request timeout exceeded. No HTTP response was obtained.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured request timeout in seconds.
        timeout_seconds: u64,
    },

    /// Storage operation failed during delivery.
    #[error("database error: {message}")]
    Database {
        /// Database error description.
        message: String,
    },

    /// Invalid client or worker configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error description.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}

impl From<hookrelay_core::CoreError> for DeliveryError {
    fn from(err: hookrelay_core::CoreError) -> Self {
        Self::database(err.to_string())
    }
}
