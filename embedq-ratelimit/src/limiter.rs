//! Two-window (minute + hour) rate limiter.
//!
//! Counters are bucketed by integer-divided Unix time, so each window starts
//! fresh on its boundary and old buckets simply expire from the store. Checking
//! is check-and-increment: every call consumes one unit of budget in the
//! minute bucket, and one in the hour bucket if the minute check passed.

use crate::error::{RateLimitError, RateLimitResult};
use crate::stores::CounterStore;
use embedq_log::{trace, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Caps for one bucket name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum checks allowed per clock minute
    pub per_minute: u64,
    /// Maximum checks allowed per clock hour
    pub per_hour: u64,
}

impl RateLimit {
    /// Create a limit.
    pub const fn new(per_minute: u64, per_hour: u64) -> Self {
        Self {
            per_minute,
            per_hour,
        }
    }

    /// Reject zero caps.
    pub fn validate(&self) -> RateLimitResult<()> {
        if self.per_minute == 0 || self.per_hour == 0 {
            return Err(RateLimitError::config("rate limits must be greater than 0"));
        }
        Ok(())
    }

    /// Cap for the given window.
    pub fn cap(&self, window: Window) -> u64 {
        match window {
            Window::Minute => self.per_minute,
            Window::Hour => self.per_hour,
        }
    }
}

/// Counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// 60 second buckets
    Minute,
    /// 3600 second buckets
    Hour,
}

impl Window {
    /// Length of the window, also used as the counter TTL.
    pub fn duration(&self) -> Duration {
        match self {
            Window::Minute => Duration::from_secs(60),
            Window::Hour => Duration::from_secs(3600),
        }
    }

    /// Bucket index containing `now_ms`.
    pub fn bucket(&self, now_ms: i64) -> i64 {
        now_ms.div_euclid(self.duration().as_millis() as i64)
    }

    /// Name used in store keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
        }
    }
}

/// Outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Both windows had room
    Allowed,
    /// A window is over its cap
    Exceeded {
        /// Window that rejected
        window: Window,
        /// Count observed after incrementing
        count: u64,
        /// Cap of that window
        limit: u64,
    },
}

impl Decision {
    /// Whether the check passed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Current counter values for one bucket name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    /// Checks counted in the current minute bucket
    pub current_minute: u64,
    /// Checks counted in the current hour bucket
    pub current_hour: u64,
}

/// Minute/hour rate limiter over a [`CounterStore`].
#[derive(Clone)]
pub struct WindowedRateLimiter {
    store: Arc<dyn CounterStore>,
    key_prefix: String,
}

impl WindowedRateLimiter {
    /// Create a limiter writing keys under `key_prefix`.
    pub fn new(store: Arc<dyn CounterStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Store key for a bucket, e.g. `embeddings:ratelimit:ml_analysis:minute:28333333`.
    pub fn bucket_key(&self, name: &str, window: Window, now_ms: i64) -> String {
        format!(
            "{}:{}:{}:{}",
            self.key_prefix,
            name,
            window.as_str(),
            window.bucket(now_ms)
        )
    }

    /// Check-and-increment `name` against `limit` at time `now_ms`.
    ///
    /// The hour counter is only touched once the minute check passes.
    pub async fn check_at(&self, name: &str, limit: RateLimit, now_ms: i64) -> RateLimitResult<Decision> {
        for window in [Window::Minute, Window::Hour] {
            let key = self.bucket_key(name, window, now_ms);
            let count = self.store.increment(&key, Some(window.duration())).await?;
            let cap = limit.cap(window);

            trace!({ bucket = name, window = window.as_str(), count = count }, "Rate counter");

            if count > cap {
                warn!(
                    { bucket = name, window = window.as_str(), count = count, limit = cap },
                    "Rate limit exceeded"
                );
                return Ok(Decision::Exceeded {
                    window,
                    count,
                    limit: cap,
                });
            }
        }

        Ok(Decision::Allowed)
    }

    /// Check-and-increment at the current wall-clock time.
    pub async fn check(&self, name: &str, limit: RateLimit) -> RateLimitResult<Decision> {
        self.check_at(name, limit, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// Read the counters for `name` without consuming budget.
    pub async fn usage_at(&self, name: &str, now_ms: i64) -> RateLimitResult<WindowUsage> {
        let minute = self
            .store
            .get(&self.bucket_key(name, Window::Minute, now_ms))
            .await?;
        let hour = self
            .store
            .get(&self.bucket_key(name, Window::Hour, now_ms))
            .await?;

        Ok(WindowUsage {
            current_minute: minute,
            current_hour: hour,
        })
    }

    /// Store type name for debugging
    pub fn store_type(&self) -> &'static str {
        self.store.store_type()
    }
}
