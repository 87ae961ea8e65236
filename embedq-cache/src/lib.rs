//! Embedding result cache for the embedq queue.
//!
//! Maps normalized input text to a previously computed vector, with a
//! time-to-live, over a pluggable [`CacheStore`].
//!
//! # Features
//!
//! - `redis` - Enable the Redis-backed store
//!
//! # Examples
//!
//! ```
//! use embedq_cache::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), CacheError> {
//! let cache = EmbeddingCache::new(Arc::new(MemoryCacheStore::new()), CacheConfig::memory());
//!
//! cache.put("the quick brown fox", &[0.25, 0.5, 0.75]).await?;
//! assert_eq!(cache.len().await?, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod traits;

pub use config::{CacheBackend, CacheConfig, DEFAULT_EMBEDDING_TTL};
pub use embedding::{DEFAULT_MAX_TEXT_CHARS, Embedding, EmbeddingCache, normalize, text_hash};
pub use error::{CacheError, CacheResult};
pub use memory::MemoryCacheStore;
#[cfg(feature = "redis")]
pub use redis::RedisCacheStore;
pub use traits::CacheStore;
