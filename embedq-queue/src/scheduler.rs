//! Low-load scheduling of deferred jobs.
//!
//! Deferred jobs live in `{prefix}:scheduled`, scored by the hour of day at
//! which they become eligible. Migration back to the live queue is the
//! sweeper's job, see [`crate::sweep`].

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::EmbeddingJob;
use crate::store::OrderedQueueStore;
use embedq_log::info;
use std::sync::Arc;

/// Next hour in `hours` strictly after `current`, wrapping to the earliest
/// one on the following day.
///
/// ```
/// use embedq_queue::scheduler::next_low_load_hour;
///
/// let hours = [0, 1, 2, 3, 4, 5];
/// assert_eq!(next_low_load_hour(14, &hours), Some(0));
/// assert_eq!(next_low_load_hour(2, &hours), Some(3));
/// assert_eq!(next_low_load_hour(5, &hours), Some(0));
/// ```
pub fn next_low_load_hour(current: u32, hours: &[u32]) -> Option<u32> {
    hours
        .iter()
        .copied()
        .filter(|h| *h > current)
        .min()
        .or_else(|| hours.iter().copied().min())
}

/// Parks jobs until the next low-load hour.
#[derive(Clone)]
pub struct LowLoadScheduler {
    store: Arc<dyn OrderedQueueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    hours: Vec<u32>,
}

impl LowLoadScheduler {
    /// Create a scheduler writing to `{prefix}:scheduled`.
    pub fn new(store: Arc<dyn OrderedQueueStore>, config: &QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            key: config.key("scheduled"),
            hours: config.low_load_hours.clone(),
        }
    }

    /// Key of the deferred set.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store `job` under its target hour and return that hour.
    pub async fn schedule_for_low_load(&self, job: &EmbeddingJob) -> QueueResult<u32> {
        let current = self.clock.local_hour();
        let target = next_low_load_hour(current, &self.hours)
            .ok_or_else(|| QueueError::Config("no low-load hours configured".into()))?;

        let member = job
            .to_member()
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.store
            .insert(&self.key, &member, f64::from(target))
            .await?;

        info!(
            { job_id = job.id, operation = job.operation, target_hour = target },
            "Job deferred to low-load window"
        );
        Ok(target)
    }

    /// Number of deferred jobs.
    pub async fn len(&self) -> QueueResult<usize> {
        self.store.len(&self.key).await
    }

    /// Whether nothing is deferred.
    pub async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }
}
