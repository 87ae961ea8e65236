//! In-memory counter store
//!
//! Uses DashMap for thread-safe concurrent access. Entries expire lazily: an
//! expired counter is reset on its next increment and reads as zero until then.

use crate::error::RateLimitResult;
use crate::stores::CounterStore;
use async_trait::async_trait;
use dashmap::DashMap;
use embedq_log::{debug, trace};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CounterState {
    count: u64,
    expires_at: Option<Instant>,
}

impl CounterState {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory counter store
pub struct MemoryCounterStore {
    counters: DashMap<String, CounterState>,
}

impl MemoryCounterStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        debug!("Creating new in-memory counter store");
        Self {
            counters: DashMap::new(),
        }
    }

    /// Number of tracked keys, expired ones included until cleanup
    pub fn key_count(&self) -> usize {
        self.counters.len()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Option<Duration>) -> RateLimitResult<u64> {
        let now = Instant::now();

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterState {
                count: 0,
                expires_at: None,
            });

        if entry.is_expired(now) {
            entry.count = 0;
            entry.expires_at = None;
        }

        entry.count += 1;
        // INCR + EXPIRE semantics: every increment refreshes the deadline
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }

        trace!({ key = key, count = entry.count }, "Counter incremented");
        Ok(entry.count)
    }

    async fn get(&self, key: &str) -> RateLimitResult<u64> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|state| !state.is_expired(now))
            .map(|state| state.count)
            .unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> RateLimitResult<()> {
        self.counters.remove(key);
        Ok(())
    }

    async fn cleanup(&self) -> RateLimitResult<()> {
        let now = Instant::now();
        self.counters.retain(|_, state| !state.is_expired(now));
        debug!({ key_count = self.key_count() }, "Counter cleanup complete");
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
