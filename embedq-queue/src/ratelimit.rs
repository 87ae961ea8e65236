//! Per-operation rate limiting.

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::operation::Operation;
use embedq_ratelimit::{CounterStore, RateLimit, WindowUsage, WindowedRateLimiter};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Counter values and caps for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationUsage {
    /// Checks counted in the current minute
    pub current_minute: u64,
    /// Checks counted in the current hour
    pub current_hour: u64,
    /// Per-minute cap
    pub minute_limit: u64,
    /// Per-hour cap
    pub hour_limit: u64,
}

impl OperationUsage {
    /// Highest fraction of either cap already consumed.
    pub fn saturation(&self) -> f64 {
        let minute = self.current_minute as f64 / self.minute_limit.max(1) as f64;
        let hour = self.current_hour as f64 / self.hour_limit.max(1) as f64;
        minute.max(hour)
    }
}

/// Applies each operation's caps using the queue clock.
#[derive(Clone)]
pub struct OperationRateLimiter {
    limiter: WindowedRateLimiter,
    limits: HashMap<Operation, RateLimit>,
    clock: Arc<dyn Clock>,
}

impl OperationRateLimiter {
    /// Create a limiter keyed under `{prefix}:ratelimit`.
    pub fn new(store: Arc<dyn CounterStore>, config: &QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter: WindowedRateLimiter::new(store, config.key("ratelimit")),
            limits: Operation::ALL
                .into_iter()
                .map(|op| (op, config.rate_limit(op)))
                .collect(),
            clock,
        }
    }

    fn limit(&self, operation: Operation) -> RateLimit {
        self.limits
            .get(&operation)
            .copied()
            .unwrap_or_else(|| operation.default_rate_limit())
    }

    /// Check-and-increment; `false` when either window is over its cap.
    pub async fn allow(&self, operation: Operation) -> QueueResult<bool> {
        let decision = self
            .limiter
            .check_at(
                operation.as_str(),
                self.limit(operation),
                self.clock.now_millis(),
            )
            .await?;
        Ok(decision.is_allowed())
    }

    /// Current counters for `operation` without consuming budget.
    pub async fn usage(&self, operation: Operation) -> QueueResult<OperationUsage> {
        let WindowUsage {
            current_minute,
            current_hour,
        } = self
            .limiter
            .usage_at(operation.as_str(), self.clock.now_millis())
            .await?;
        let limit = self.limit(operation);

        Ok(OperationUsage {
            current_minute,
            current_hour,
            minute_limit: limit.per_minute,
            hour_limit: limit.per_hour,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use embedq_ratelimit::MemoryCounterStore;

    fn limiter(clock: Arc<ManualClock>) -> OperationRateLimiter {
        OperationRateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            &QueueConfig::default(),
            clock,
        )
    }

    #[tokio::test]
    async fn test_ml_analysis_minute_cap() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000, 14));
        let limiter = limiter(clock.clone());

        for _ in 0..5 {
            assert!(limiter.allow(Operation::MlAnalysis).await.unwrap());
        }
        assert!(!limiter.allow(Operation::MlAnalysis).await.unwrap());

        clock.advance_millis(60_000);
        assert!(limiter.allow(Operation::MlAnalysis).await.unwrap());
    }

    #[tokio::test]
    async fn test_usage_reports_caps() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000, 14));
        let limiter = limiter(clock);

        limiter.allow(Operation::BatchProcessing).await.unwrap();
        let usage = limiter.usage(Operation::BatchProcessing).await.unwrap();

        assert_eq!(usage.current_minute, 1);
        assert_eq!(usage.current_hour, 1);
        assert_eq!(usage.minute_limit, 2);
        assert_eq!(usage.hour_limit, 50);
        assert_eq!(usage.saturation(), 0.5);
    }

    #[tokio::test]
    async fn test_config_override() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000, 14));
        let config = QueueConfig::default().with_rate_limit(Operation::ChatRetrieval, RateLimit::new(1, 10));
        let limiter = OperationRateLimiter::new(Arc::new(MemoryCounterStore::new()), &config, clock);

        assert!(limiter.allow(Operation::ChatRetrieval).await.unwrap());
        assert!(!limiter.allow(Operation::ChatRetrieval).await.unwrap());
    }
}
