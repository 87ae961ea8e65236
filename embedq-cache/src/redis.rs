//! Redis cache store.

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::traits::CacheStore;
use async_trait::async_trait;
use embedq_log::debug;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;

const SCAN_COUNT: usize = 500;

/// Redis-backed [`CacheStore`].
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
}

impl RedisCacheStore {
    /// Connect using the URL in `config`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use embedq_cache::*;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), CacheError> {
    ///     let config = CacheConfig::redis("redis://localhost:6379");
    ///     let store = RedisCacheStore::new(&config).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: &CacheConfig) -> CacheResult<Self> {
        debug!({ url = config.url }, "Connecting to Redis for embedding cache");

        let client =
            Client::open(config.url.as_str()).map_err(|e| CacheError::Connection(e.to_string()))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self { connection })
    }

    /// Reuse an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Collect keys under `prefix` with incremental `SCAN`.
    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);

            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.connection.clone();

        if let Some(ttl) = ttl {
            let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        } else {
            let _: () = conn.set(key, value).await?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut conn = self.connection.clone();
        let ttl_seconds: i64 = conn.ttl(key).await?;

        // -2: missing, -1: no expiry
        match ttl_seconds {
            seconds if seconds > 0 => Ok(Some(Duration::from_secs(seconds as u64))),
            _ => Ok(None),
        }
    }

    async fn count(&self, prefix: &str) -> CacheResult<usize> {
        Ok(self.keys_with_prefix(prefix).await?.len())
    }

    async fn clear(&self, prefix: &str) -> CacheResult<usize> {
        let keys = self.keys_with_prefix(prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection.clone();
        let removed: usize = conn.del(keys).await?;
        Ok(removed)
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}
