//! Error types for admission control.
//!
//! Errors are split by where they originate: the counter store, the
//! connection to it, the route/algorithm configuration, and route lookup.
//! The gateway relies on this split to decide between the configured
//! fail-open/fail-closed policy and an unconditional rejection.

use std::time::Duration;
use thiserror::Error;

/// Result type for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Main error type for rate limiting operations.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection error (e.g., Redis connection failed or timed out).
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// No algorithm is mapped for the requested route.
    #[error("No rate limit configured for route '{0}'")]
    NotConfigured(String),
}

impl RateLimitError {
    /// Whether this error means the counter store could not be reached or
    /// did not complete the operation.
    ///
    /// These are the errors the gateway answers with its failure mode;
    /// anything else is denied outright.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Connection(_))
    }
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A store command failed.
    #[error("{0}")]
    OperationFailed(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The store returned a reply the client could not interpret.
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),

    /// Connection pool exhausted.
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl StorageError {
    /// Create a new operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::OperationFailed(message.into())
    }
}

/// Configuration-related errors.
///
/// All of these are raised while a configuration is loaded, never while a
/// request is being admitted.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Non-positive rate, window, capacity or an otherwise unusable parameter.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// A route entry that cannot be used (empty pattern, duplicate, ...).
    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    /// A variant name that does not describe a known algorithm.
    #[error("Unknown algorithm variant: {0}")]
    UnknownVariant(String),

    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// The configuration document could not be read or parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to connect.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// Store round-trip did not finish in time.
    #[error("Store round-trip timed out after {0:?}")]
    Timeout(Duration),
}
