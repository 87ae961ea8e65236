//! Ordered queue storage.
//!
//! A narrow sorted-set/set abstraction in Redis terms. The in-memory store
//! mirrors Redis ordering: ascending score, ties broken by member bytes.

use crate::error::QueueResult;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sorted-set and set operations used by the queue.
#[async_trait]
pub trait OrderedQueueStore: Send + Sync {
    /// Insert `member` with `score`, replacing the score if already present.
    async fn insert(&self, key: &str, member: &str, score: f64) -> QueueResult<()>;

    /// Remove `member`; `true` if it was present. Only one concurrent caller
    /// can observe `true` for the same member.
    async fn remove(&self, key: &str, member: &str) -> QueueResult<bool>;

    /// Members by ascending score between rank `start` and `stop` inclusive.
    /// Negative ranks count from the end.
    async fn range(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>>;

    /// Members with `min <= score <= max`, ascending.
    async fn range_by_score(&self, key: &str, min: f64, max: f64) -> QueueResult<Vec<(String, f64)>>;

    /// Number of members in the sorted set.
    async fn len(&self, key: &str) -> QueueResult<usize>;

    /// Add to a plain set.
    async fn set_add(&self, key: &str, member: &str) -> QueueResult<()>;

    /// Remove from a plain set.
    async fn set_remove(&self, key: &str, member: &str) -> QueueResult<()>;

    /// Members of a plain set, unordered.
    async fn set_members(&self, key: &str) -> QueueResult<Vec<String>>;

    /// Number of members in a plain set.
    async fn set_len(&self, key: &str) -> QueueResult<usize>;

    /// Drop a key of either kind.
    async fn delete(&self, key: &str) -> QueueResult<()>;

    /// Store type name for debugging
    fn store_type(&self) -> &'static str;
}

fn entry_order(a: &(f64, String), b: &(f64, String)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.as_bytes().cmp(b.1.as_bytes()))
}

/// Resolve Redis-style inclusive ranks against a collection of `len` items.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if len == 0 || start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

#[derive(Debug, Default)]
struct Collections {
    sorted: HashMap<String, Vec<(f64, String)>>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-memory [`OrderedQueueStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    inner: Arc<Mutex<Collections>>,
}

impl MemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderedQueueStore for MemoryQueueStore {
    async fn insert(&self, key: &str, member: &str, score: f64) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let entries = inner.sorted.entry(key.to_string()).or_default();

        entries.retain(|(_, existing)| existing != member);
        let entry = (score, member.to_string());
        let idx = entries
            .binary_search_by(|probe| entry_order(probe, &entry))
            .unwrap_or_else(|idx| idx);
        entries.insert(idx, entry);
        Ok(())
    }

    async fn remove(&self, key: &str, member: &str) -> QueueResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(entries) = inner.sorted.get_mut(key) else {
            return Ok(false);
        };

        let before = entries.len();
        entries.retain(|(_, existing)| existing != member);
        let removed = entries.len() < before;

        if entries.is_empty() {
            inner.sorted.remove(key);
        }
        Ok(removed)
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let Some(entries) = inner.sorted.get(key) else {
            return Ok(Vec::new());
        };

        Ok(match resolve_range(entries.len(), start, stop) {
            Some((start, stop)) => entries[start..=stop]
                .iter()
                .map(|(_, member)| member.clone())
                .collect(),
            None => Vec::new(),
        })
    }

    async fn range_by_score(&self, key: &str, min: f64, max: f64) -> QueueResult<Vec<(String, f64)>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sorted
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(score, _)| *score >= min && *score <= max)
                    .map(|(score, member)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn len(&self, key: &str) -> QueueResult<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.sorted.get(key).map_or(0, Vec::len))
    }

    async fn set_add(&self, key: &str, member: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(set) = inner.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                inner.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> QueueResult<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_len(&self, key: &str) -> QueueResult<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.sets.get(key).map_or(0, HashSet::len))
    }

    async fn delete(&self, key: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.sorted.remove(key);
        inner.sets.remove(key);
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(feature = "redis")]
pub use self::redis_store::RedisQueueStore;

#[cfg(feature = "redis")]
mod redis_store {
    use super::OrderedQueueStore;
    use crate::error::{QueueError, QueueResult};
    use async_trait::async_trait;
    use embedq_log::{debug, info};
    use redis::{AsyncCommands, Client, aio::ConnectionManager};

    /// Redis-backed [`OrderedQueueStore`].
    #[derive(Clone)]
    pub struct RedisQueueStore {
        connection: ConnectionManager,
    }

    impl RedisQueueStore {
        /// Connect to Redis.
        pub async fn new(redis_url: &str) -> QueueResult<Self> {
            debug!({ url = redis_url }, "Connecting to Redis for queue storage");

            let client = Client::open(redis_url).map_err(|e| QueueError::Config(e.to_string()))?;
            let connection = ConnectionManager::new(client).await?;

            info!("Queue store ready");
            Ok(Self { connection })
        }

        /// Reuse an existing connection manager.
        pub fn from_connection(connection: ConnectionManager) -> Self {
            Self { connection }
        }
    }

    #[async_trait]
    impl OrderedQueueStore for RedisQueueStore {
        async fn insert(&self, key: &str, member: &str, score: f64) -> QueueResult<()> {
            let mut conn = self.connection.clone();
            let _: () = conn.zadd(key, member, score).await?;
            Ok(())
        }

        async fn remove(&self, key: &str, member: &str) -> QueueResult<bool> {
            let mut conn = self.connection.clone();
            let removed: i64 = conn.zrem(key, member).await?;
            Ok(removed > 0)
        }

        async fn range(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>> {
            let mut conn = self.connection.clone();
            let members: Vec<String> = conn.zrange(key, start, stop).await?;
            Ok(members)
        }

        async fn range_by_score(
            &self,
            key: &str,
            min: f64,
            max: f64,
        ) -> QueueResult<Vec<(String, f64)>> {
            let mut conn = self.connection.clone();
            let members: Vec<(String, f64)> = conn.zrangebyscore_withscores(key, min, max).await?;
            Ok(members)
        }

        async fn len(&self, key: &str) -> QueueResult<usize> {
            let mut conn = self.connection.clone();
            let len: usize = conn.zcard(key).await?;
            Ok(len)
        }

        async fn set_add(&self, key: &str, member: &str) -> QueueResult<()> {
            let mut conn = self.connection.clone();
            let _: () = conn.sadd(key, member).await?;
            Ok(())
        }

        async fn set_remove(&self, key: &str, member: &str) -> QueueResult<()> {
            let mut conn = self.connection.clone();
            let _: () = conn.srem(key, member).await?;
            Ok(())
        }

        async fn set_members(&self, key: &str) -> QueueResult<Vec<String>> {
            let mut conn = self.connection.clone();
            let members: Vec<String> = conn.smembers(key).await?;
            Ok(members)
        }

        async fn set_len(&self, key: &str) -> QueueResult<usize> {
            let mut conn = self.connection.clone();
            let len: usize = conn.scard(key).await?;
            Ok(len)
        }

        async fn delete(&self, key: &str) -> QueueResult<()> {
            let mut conn = self.connection.clone();
            let _: () = conn.del(key).await?;
            Ok(())
        }

        fn store_type(&self) -> &'static str {
            "redis"
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        // Requires Redis running: cargo test --features redis -- --ignored
        #[tokio::test]
        #[ignore]
        async fn test_redis_sorted_set() {
            let store = RedisQueueStore::new("redis://localhost:6379").await.unwrap();
            let key = "embedq:test:queue";

            store.delete(key).await.unwrap();
            store.insert(key, "b", 2.0).await.unwrap();
            store.insert(key, "a", 0.0).await.unwrap();

            assert_eq!(store.range(key, 0, -1).await.unwrap(), vec!["a", "b"]);
            assert!(store.remove(key, "a").await.unwrap());
            assert!(!store.remove(key, "a").await.unwrap());
            store.delete(key).await.unwrap();
        }
    }
}
