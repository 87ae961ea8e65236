//! Cache configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lifetime of a cached embedding.
pub const DEFAULT_EMBEDDING_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Cache backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process store
    Memory,
    /// Redis backend
    Redis,
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache backend type
    pub backend: CacheBackend,

    /// Connection URL (unused for the memory backend)
    pub url: String,

    /// Key prefix for all cache keys
    pub key_prefix: String,

    /// Lifetime of written entries
    pub ttl: Duration,
}

impl CacheConfig {
    /// In-memory configuration.
    pub fn memory() -> Self {
        Self {
            backend: CacheBackend::Memory,
            url: String::new(),
            key_prefix: "embeddings:cache".to_string(),
            ttl: DEFAULT_EMBEDDING_TTL,
        }
    }

    /// Redis configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use embedq_cache::CacheConfig;
    ///
    /// let config = CacheConfig::redis("redis://localhost:6379").with_key_prefix("app:embeddings");
    /// assert_eq!(config.build_key("abc"), "app:embeddings:abc");
    /// ```
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            backend: CacheBackend::Redis,
            url: url.into(),
            ..Self::memory()
        }
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the entry lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Build the final key with prefix.
    pub fn build_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_defaults() {
        let config = CacheConfig::memory();
        assert_eq!(config.backend, CacheBackend::Memory);
        assert_eq!(config.key_prefix, "embeddings:cache");
        assert_eq!(config.ttl, Duration::from_secs(604_800));
    }

    #[test]
    fn test_redis_config() {
        let config = CacheConfig::redis("redis://localhost:6379");
        assert_eq!(config.backend, CacheBackend::Redis);
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.ttl, DEFAULT_EMBEDDING_TTL);
    }

    #[test]
    fn test_build_key_without_prefix() {
        let config = CacheConfig::memory().with_key_prefix("");
        assert_eq!(config.build_key("k"), "k");
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(serde_json::to_string(&CacheBackend::Redis).unwrap(), "\"redis\"");
        let backend: CacheBackend = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(backend, CacheBackend::Memory);
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::memory()
            .with_key_prefix("x")
            .with_ttl(Duration::from_secs(10));
        assert_eq!(config.build_key("y"), "x:y");
        assert_eq!(config.ttl, Duration::from_secs(10));
    }
}
