//! Unified error types for the cache and invalidation layers.

use thiserror::Error;

/// Unified error type for Tessera.
///
/// Most cache-facing APIs never surface these to their callers: backend and
/// deserialization failures are logged and degraded to a miss. The enum
/// exists for the fallible layers underneath (backends, transports, config
/// loading) and for the few operations that must report failure.
#[derive(Error, Debug)]
pub enum TesseraError {
    // ============ Cache Errors ============
    /// Backing key-value store failure (connection, command, pool).
    #[error("Cache error: {0}")]
    Cache(String),

    /// A stored value or outgoing payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A cache key, scope or pattern was rejected.
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    // ============ Infrastructure Errors ============
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Message transport failure while publishing or consuming invalidations.
    #[error("Transport error: {transport} - {message}")]
    Transport { transport: String, message: String },

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TesseraError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Cache(_) => "CACHE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::InvalidKey(_) => "INVALID_KEY",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a cache error.
    #[must_use]
    pub fn cache<T: Into<String>>(message: T) -> Self {
        Self::Cache(message.into())
    }

    /// Creates an invalid key error.
    #[must_use]
    pub fn invalid_key<T: Into<String>>(message: T) -> Self {
        Self::InvalidKey(message.into())
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport<S: Into<String>, M: Into<String>>(transport: S, message: M) -> Self {
        Self::Transport {
            transport: transport.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Cache(_) | Self::Transport { .. } | Self::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for TesseraError {
    fn from(err: redis::RedisError) -> Self {
        Self::Cache(format!("Redis command failed: {}", err))
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for TesseraError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Cache(format!("Failed to get Redis connection: {}", err))
    }
}
