//! Cache store trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Key/value store holding serialized cache entries.
///
/// Keys are passed through unchanged; prefixing is the caller's concern.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a JSON value from the cache.
    ///
    /// Returns `Ok(None)` if the key is missing or expired.
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a JSON value in the cache.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key
    /// * `value` - The JSON string value
    /// * `ttl` - Optional time-to-live duration
    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a key from the cache.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Check if a key exists in the cache.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Remaining lifetime of a key, `None` if missing or persistent.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Number of live keys starting with `prefix`.
    async fn count(&self, prefix: &str) -> CacheResult<usize>;

    /// Delete every key starting with `prefix`, returning how many were removed.
    async fn clear(&self, prefix: &str) -> CacheResult<usize>;

    /// Store type name for debugging
    fn store_type(&self) -> &'static str;
}
