//! Error types for rate limiting

use thiserror::Error;

/// Result type for rate limiting operations
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Rate limiting errors
///
/// A rejected request is not an error; it is reported through
/// [`Decision`](crate::Decision). These variants cover store and
/// configuration failures only.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Counter store error
    #[error("Rate limit store error: {0}")]
    StoreError(String),

    /// Configuration error
    #[error("Rate limit configuration error: {0}")]
    ConfigError(String),

    /// Redis connection error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
}

impl RateLimitError {
    /// Create a new store error
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::StoreError(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let error = RateLimitError::store("connection refused");
        assert_eq!(error.to_string(), "Rate limit store error: connection refused");
    }

    #[test]
    fn test_config_error_display() {
        let error = RateLimitError::config("per_minute must be > 0");
        assert!(error.to_string().contains("per_minute"));
    }
}
