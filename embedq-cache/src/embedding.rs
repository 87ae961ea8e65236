//! Content-addressed embedding cache.
//!
//! Texts are normalized (truncated, then trimmed) before hashing, so a long
//! text and its truncated job payload resolve to the same entry.

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::traits::CacheStore;
use embedq_log::{debug, trace};
use std::sync::Arc;

/// An embedding vector.
pub type Embedding = Vec<f32>;

/// Default number of characters kept from an input text.
pub const DEFAULT_MAX_TEXT_CHARS: usize = 5000;

/// Normalize `text` for hashing: keep the first `max_chars` characters and
/// trim surrounding whitespace.
pub fn normalize(text: &str, max_chars: usize) -> &str {
    let end = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(idx, _)| idx);
    text[..end].trim()
}

/// 64-bit polynomial rolling hash (`h = h * 31 + c`) rendered in base 36.
pub fn text_hash(text: &str) -> String {
    let hash = text
        .chars()
        .fold(0u64, |h, c| h.wrapping_mul(31).wrapping_add(c as u64));
    to_base36(hash)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::with_capacity(13);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Text → vector cache over any [`CacheStore`].
///
/// # Examples
///
/// ```
/// use embedq_cache::{CacheConfig, EmbeddingCache, MemoryCacheStore};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), embedq_cache::CacheError> {
/// let cache = EmbeddingCache::new(Arc::new(MemoryCacheStore::new()), CacheConfig::memory());
///
/// cache.put("hello world", &[0.1, 0.2]).await?;
/// assert_eq!(cache.get("  hello world ").await?, Some(vec![0.1, 0.2]));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EmbeddingCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    max_chars: usize,
}

impl EmbeddingCache {
    /// Create a cache writing under `config.key_prefix` with `config.ttl`.
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            max_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }

    /// Set the normalization truncation length.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    /// Cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Deterministic key for `text`: `{prefix}:{hash}:{len}`.
    pub fn cache_key(&self, text: &str) -> String {
        let normalized = normalize(text, self.max_chars);
        let id = format!(
            "{}:{}",
            text_hash(normalized),
            normalized.chars().count()
        );
        self.config.build_key(&id)
    }

    /// Look up the vector for `text`.
    pub async fn get(&self, text: &str) -> CacheResult<Option<Embedding>> {
        let key = self.cache_key(text);
        self.get_by_key(&key).await
    }

    /// Look up a vector by its full cache key.
    pub async fn get_by_key(&self, key: &str) -> CacheResult<Option<Embedding>> {
        let Some(raw) = self.store.get_json(key).await? else {
            trace!({ cache_key = key }, "Cache miss");
            return Ok(None);
        };

        let embedding: Embedding = serde_json::from_str(&raw)
            .map_err(|e| CacheError::Deserialization(e.to_string()))?;

        debug!({ cache_key = key, dimensions = embedding.len() }, "Cache hit");
        Ok(Some(embedding))
    }

    /// Store the vector for `text` with the configured lifetime.
    pub async fn put(&self, text: &str, embedding: &[f32]) -> CacheResult<String> {
        let key = self.cache_key(text);
        let raw = serde_json::to_string(embedding)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        self.store
            .set_json(&key, raw, Some(self.config.ttl))
            .await?;

        trace!({ cache_key = key, dimensions = embedding.len() }, "Cached embedding");
        Ok(key)
    }

    /// Whether a vector is cached for `text`.
    pub async fn contains(&self, text: &str) -> CacheResult<bool> {
        self.store.exists(&self.cache_key(text)).await
    }

    /// Drop the entry for `text`.
    pub async fn remove(&self, text: &str) -> CacheResult<()> {
        self.store.delete(&self.cache_key(text)).await
    }

    /// Number of cached embeddings.
    pub async fn len(&self) -> CacheResult<usize> {
        self.store.count(&self.scan_prefix()).await
    }

    /// Whether nothing is cached.
    pub async fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drop every cached embedding.
    pub async fn clear(&self) -> CacheResult<usize> {
        let removed = self.store.clear(&self.scan_prefix()).await?;
        debug!({ removed = removed }, "Cleared embedding cache");
        Ok(removed)
    }

    fn scan_prefix(&self) -> String {
        self.config.build_key("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCacheStore;
    use std::time::Duration;

    fn cache() -> EmbeddingCache {
        EmbeddingCache::new(Arc::new(MemoryCacheStore::new()), CacheConfig::memory())
    }

    #[test]
    fn test_normalize_trims() {
        assert_eq!(normalize("  hi there \n", 5000), "hi there");
    }

    #[test]
    fn test_normalize_truncates_by_chars() {
        assert_eq!(normalize("héllo", 2), "hé");
        assert_eq!(normalize("abc", 10), "abc");
        assert_eq!(normalize("abc", 0), "");
    }

    #[test]
    fn test_text_hash_known_values() {
        assert_eq!(text_hash(""), "0");
        // 'a' = 97 = 2 * 36 + 25
        assert_eq!(text_hash("a"), "2p");
        assert_eq!(text_hash("abc"), text_hash("abc"));
        assert_ne!(text_hash("abc"), text_hash("acb"));
    }

    #[test]
    fn test_cache_key_shape() {
        let cache = cache();
        let key = cache.cache_key("a");
        assert_eq!(key, "embeddings:cache:2p:1");
    }

    #[test]
    fn test_long_text_matches_truncated_payload() {
        let cache = cache().with_max_chars(10);
        let long = "x".repeat(25);
        let truncated: String = long.chars().take(10).collect();
        assert_eq!(cache.cache_key(&long), cache.cache_key(&truncated));
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = cache();
        assert!(cache.get("hello").await.unwrap().is_none());

        let key = cache.put("hello", &[1.0, -0.5]).await.unwrap();
        assert_eq!(key, cache.cache_key("hello"));
        assert_eq!(cache.get("hello").await.unwrap(), Some(vec![1.0, -0.5]));
        assert!(cache.contains("hello").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_sets_ttl() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = EmbeddingCache::new(store.clone(), CacheConfig::memory());
        let key = cache.put("t", &[0.0]).await.unwrap();

        let ttl = store.ttl(&key).await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(6 * 24 * 3600));
        assert!(ttl <= Duration::from_secs(7 * 24 * 3600));
    }

    #[tokio::test]
    async fn test_len_and_clear() {
        let store = Arc::new(MemoryCacheStore::new());
        store.set_json("unrelated", "1".into(), None).await.unwrap();
        let cache = EmbeddingCache::new(store.clone(), CacheConfig::memory());

        cache.put("a", &[1.0]).await.unwrap();
        cache.put("b", &[2.0]).await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 2);

        cache.remove("a").await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 1);

        assert_eq!(cache.clear().await.unwrap(), 1);
        assert!(cache.is_empty().await.unwrap());
        assert!(store.exists("unrelated").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_an_error() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = EmbeddingCache::new(store.clone(), CacheConfig::memory());
        store
            .set_json(&cache.cache_key("bad"), "not json".into(), None)
            .await
            .unwrap();

        assert!(matches!(
            cache.get("bad").await,
            Err(CacheError::Deserialization(_))
        ));
    }
}
