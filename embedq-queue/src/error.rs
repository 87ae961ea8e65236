//! Error types for queue operations.

use crate::backend::BackendError;
use crate::operation::Operation;
use embedq_cache::CacheError;
use embedq_ratelimit::RateLimitError;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Ordered store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Counter store failure
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Cache failure
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Embedding backend failure
    #[error("Embedding backend failed: {0}")]
    Backend(#[from] BackendError),

    /// Immediate processing requested for a non-critical operation
    #[error("Operation {0} cannot be processed immediately")]
    InvalidOperationForImmediate(Operation),

    /// Worker already running
    #[error("Worker already running")]
    WorkerAlreadyRunning,

    /// Worker not running
    #[error("Worker not running")]
    WorkerNotRunning,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Build a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}
