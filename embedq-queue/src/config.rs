//! Queue configuration.

use crate::error::{QueueError, QueueResult};
use crate::operation::Operation;
use embedq_cache::DEFAULT_EMBEDDING_TTL;
use embedq_ratelimit::RateLimit;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Default tick interval of the processing loop.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Default interval between deferred-set sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Score penalty applied to a job after a failed attempt.
pub const DEFAULT_RETRY_DEMOTION: u32 = 10;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Prefix for every store key
    pub key_prefix: String,

    /// Processing loop tick
    pub tick_interval: Duration,

    /// Jobs claimed per tick
    pub jobs_per_tick: usize,

    /// Interval between deferred-set sweeps
    pub sweep_interval: Duration,

    /// Characters kept from each input text
    pub max_text_chars: usize,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Score penalty for retried jobs
    pub retry_demotion: u32,

    /// Local hours during which low-priority work drains
    pub low_load_hours: Vec<u32>,

    /// Lifetime of cached embeddings
    pub cache_ttl: Duration,

    /// Start the processing loop on the first live enqueue
    pub auto_start: bool,

    /// Per-operation caps
    pub rate_limits: HashMap<Operation, RateLimit>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key_prefix: "embeddings".to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            jobs_per_tick: 1,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_text_chars: 5000,
            max_retries: 3,
            retry_demotion: DEFAULT_RETRY_DEMOTION,
            low_load_hours: (0..=5).collect(),
            cache_ttl: DEFAULT_EMBEDDING_TTL,
            auto_start: true,
            rate_limits: Operation::ALL
                .into_iter()
                .map(|op| (op, op.default_rate_limit()))
                .collect(),
        }
    }
}

impl QueueConfig {
    /// Default configuration under `key_prefix`.
    ///
    /// ```
    /// use embedq_queue::QueueConfig;
    /// use std::time::Duration;
    ///
    /// let config = QueueConfig::new("myapp:embeddings")
    ///     .with_tick_interval(Duration::from_millis(250))
    ///     .with_low_load_hours(vec![1, 2, 3]);
    ///
    /// assert_eq!(config.key("queue"), "myapp:embeddings:queue");
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            ..Self::default()
        }
    }

    /// Load from `EMBEDQ_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();

        let low_load_hours = lookup("EMBEDQ_LOW_LOAD_HOURS")
            .map(|v| {
                v.split(',')
                    .filter_map(|h| h.trim().parse::<u32>().ok())
                    .filter(|h| *h < 24)
                    .collect::<Vec<_>>()
            })
            .filter(|hours| !hours.is_empty())
            .unwrap_or(defaults.low_load_hours);

        Self {
            key_prefix: lookup("EMBEDQ_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            tick_interval: parsed(lookup("EMBEDQ_TICK_INTERVAL_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            jobs_per_tick: parsed(lookup("EMBEDQ_JOBS_PER_TICK"))
                .unwrap_or(defaults.jobs_per_tick)
                .max(1),
            sweep_interval: parsed(lookup("EMBEDQ_SWEEP_INTERVAL_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            max_text_chars: parsed(lookup("EMBEDQ_MAX_TEXT_CHARS"))
                .unwrap_or(defaults.max_text_chars),
            max_retries: parsed(lookup("EMBEDQ_MAX_RETRIES")).unwrap_or(defaults.max_retries),
            retry_demotion: defaults.retry_demotion,
            low_load_hours,
            cache_ttl: parsed(lookup("EMBEDQ_CACHE_TTL_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            auto_start: lookup("EMBEDQ_AUTO_START")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.auto_start),
            rate_limits: defaults.rate_limits,
        }
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the number of jobs claimed per tick.
    pub fn with_jobs_per_tick(mut self, jobs: usize) -> Self {
        self.jobs_per_tick = jobs;
        self
    }

    /// Set the deferred sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the text truncation length.
    pub fn with_max_text_chars(mut self, chars: usize) -> Self {
        self.max_text_chars = chars;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the retry score penalty.
    pub fn with_retry_demotion(mut self, demotion: u32) -> Self {
        self.retry_demotion = demotion;
        self
    }

    /// Set the low-load hours.
    pub fn with_low_load_hours(mut self, hours: Vec<u32>) -> Self {
        self.low_load_hours = hours;
        self
    }

    /// Set the cache lifetime.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Enable or disable starting the loop from `enqueue`.
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Override the caps of one operation.
    pub fn with_rate_limit(mut self, operation: Operation, limit: RateLimit) -> Self {
        self.rate_limits.insert(operation, limit);
        self
    }

    /// Caps for `operation`.
    pub fn rate_limit(&self, operation: Operation) -> RateLimit {
        self.rate_limits
            .get(&operation)
            .copied()
            .unwrap_or_else(|| operation.default_rate_limit())
    }

    /// Whether `hour` is a low-load hour.
    pub fn is_low_load_hour(&self, hour: u32) -> bool {
        self.low_load_hours.contains(&hour)
    }

    /// Build a store key.
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }

    /// Check invariants.
    pub fn validate(&self) -> QueueResult<()> {
        if self.tick_interval.is_zero() {
            return Err(QueueError::Config("tick_interval must be non-zero".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(QueueError::Config("sweep_interval must be non-zero".into()));
        }
        if self.jobs_per_tick == 0 {
            return Err(QueueError::Config("jobs_per_tick must be at least 1".into()));
        }
        if self.max_text_chars == 0 {
            return Err(QueueError::Config("max_text_chars must be at least 1".into()));
        }
        if self.low_load_hours.is_empty() {
            return Err(QueueError::Config("low_load_hours must not be empty".into()));
        }
        if let Some(hour) = self.low_load_hours.iter().find(|h| **h > 23) {
            return Err(QueueError::Config(format!("invalid low-load hour: {}", hour)));
        }
        for limit in self.rate_limits.values() {
            limit
                .validate()
                .map_err(|e| QueueError::Config(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.key_prefix, "embeddings");
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert_eq!(config.jobs_per_tick, 1);
        assert_eq!(config.max_text_chars, 5000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_demotion, 10);
        assert_eq!(config.low_load_hours, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(config.cache_ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.rate_limit(Operation::MlAnalysis), RateLimit::new(5, 100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let config = QueueConfig::from_lookup(|key| match key {
            "EMBEDQ_KEY_PREFIX" => Some("app:emb".to_string()),
            "EMBEDQ_TICK_INTERVAL_MS" => Some("250".to_string()),
            "EMBEDQ_JOBS_PER_TICK" => Some("0".to_string()),
            "EMBEDQ_LOW_LOAD_HOURS" => Some("22, 23,99,x".to_string()),
            "EMBEDQ_MAX_RETRIES" => Some("5".to_string()),
            "EMBEDQ_AUTO_START" => Some("false".to_string()),
            _ => None,
        });

        assert_eq!(config.key("queue"), "app:emb:queue");
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.jobs_per_tick, 1);
        assert_eq!(config.low_load_hours, vec![22, 23]);
        assert_eq!(config.max_retries, 5);
        assert!(!config.auto_start);
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = QueueConfig::from_lookup(|key| match key {
            "EMBEDQ_LOW_LOAD_HOURS" => Some("nope".to_string()),
            "EMBEDQ_MAX_TEXT_CHARS" => Some("many".to_string()),
            _ => None,
        });

        assert_eq!(config.low_load_hours, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(config.max_text_chars, 5000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(QueueConfig::default().with_low_load_hours(vec![]).validate().is_err());
        assert!(QueueConfig::default().with_low_load_hours(vec![24]).validate().is_err());
        assert!(QueueConfig::default().with_jobs_per_tick(0).validate().is_err());
        assert!(
            QueueConfig::default()
                .with_rate_limit(Operation::BatchProcessing, RateLimit::new(0, 1))
                .validate()
                .is_err()
        );
    }
}
