//! Redis counter store
//!
//! `INCR` and `EXPIRE` run in one `MULTI`/`EXEC` pipeline so the count and its
//! deadline are set together. Requires the `redis` feature.

use crate::error::RateLimitResult;
use crate::stores::CounterStore;
use async_trait::async_trait;
use embedq_log::debug;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Redis-backed counter store
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn new(url: &str) -> RateLimitResult<Self> {
        debug!({ url = url }, "Connecting to Redis for counters");

        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self { conn })
    }

    /// Reuse an existing connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, ttl: Option<Duration>) -> RateLimitResult<u64> {
        let mut conn = self.conn.clone();

        let count = match ttl {
            Some(ttl) => {
                let (count,): (u64,) = redis::pipe()
                    .atomic()
                    .incr(key, 1)
                    .expire(key, ttl.as_secs().max(1) as i64)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                count
            }
            None => conn.incr(key, 1).await?,
        };

        Ok(count)
    }

    async fn get(&self, key: &str) -> RateLimitResult<u64> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> RateLimitResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}
