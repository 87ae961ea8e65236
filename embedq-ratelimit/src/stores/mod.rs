//! Counter storage backends
//!
//! - **Memory**: in-process counters using DashMap (single instance, tests)
//! - **Redis**: shared counters for deployments where the store must survive
//!   process restarts

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryCounterStore;
#[cfg(feature = "redis")]
pub use redis::RedisCounterStore;

use crate::error::RateLimitResult;
use async_trait::async_trait;
use std::time::Duration;

/// Atomic counters with optional expiry.
///
/// `increment` must be atomic with respect to concurrent callers: two
/// increments of the same key always observe distinct counts.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one and return the new count.
    ///
    /// When `ttl` is given the key expires `ttl` after this call. An expired
    /// key counts from zero again.
    async fn increment(&self, key: &str, ttl: Option<Duration>) -> RateLimitResult<u64>;

    /// Read the current count without modifying it. Missing or expired keys
    /// read as zero.
    async fn get(&self, key: &str) -> RateLimitResult<u64>;

    /// Remove a counter.
    async fn delete(&self, key: &str) -> RateLimitResult<()>;

    /// Drop expired entries (optional, for memory optimization)
    async fn cleanup(&self) -> RateLimitResult<()> {
        Ok(())
    }

    /// Store type name for debugging
    fn store_type(&self) -> &'static str;
}
