//! Migration of deferred jobs back into the live queue.

use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::job::EmbeddingJob;
use crate::store::OrderedQueueStore;
use embedq_log::{error, info};
use std::sync::Arc;

/// Promotes deferred jobs once their target hour has arrived.
#[derive(Clone)]
pub struct DeferredSweeper {
    store: Arc<dyn OrderedQueueStore>,
    scheduled_key: String,
    queue_key: String,
    hours: Vec<u32>,
    demotion: u32,
}

impl DeferredSweeper {
    /// Create a sweeper moving `{prefix}:scheduled` into `{prefix}:queue`.
    pub fn new(store: Arc<dyn OrderedQueueStore>, config: &QueueConfig) -> Self {
        Self {
            store,
            scheduled_key: config.key("scheduled"),
            queue_key: config.key("queue"),
            hours: config.low_load_hours.clone(),
            demotion: config.retry_demotion,
        }
    }

    /// Move every job whose target hour is `<= hour` into the live queue.
    ///
    /// Does nothing outside low-load hours. Scores are hours of day, so a job
    /// targeted at the first low-load hour of the next day is due on any
    /// low-load hour at or after it, including the rest of tonight's window.
    /// Returns the number promoted.
    pub async fn promote_due(&self, hour: u32) -> QueueResult<usize> {
        if !self.hours.contains(&hour) {
            return Ok(0);
        }

        let due = self
            .store
            .range_by_score(&self.scheduled_key, f64::NEG_INFINITY, f64::from(hour))
            .await?;

        let mut promoted = 0;
        for (member, _) in due {
            if !self.store.remove(&self.scheduled_key, &member).await? {
                continue;
            }

            match EmbeddingJob::from_member(&member) {
                Ok(job) => {
                    self.store
                        .insert(&self.queue_key, &member, job.score(self.demotion))
                        .await?;
                    promoted += 1;
                }
                Err(e) => {
                    error!({ error = e }, "Dropping unreadable deferred job");
                }
            }
        }

        if promoted > 0 {
            info!({ promoted = promoted, hour = hour }, "Promoted deferred jobs");
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Operation, Priority};
    use crate::store::MemoryQueueStore;

    async fn defer(store: &MemoryQueueStore, text: &str, hour: u32) -> EmbeddingJob {
        let job = EmbeddingJob::new(text, Operation::BatchProcessing, Priority::Background, 5000, 0);
        store
            .insert("embeddings:scheduled", &job.to_member().unwrap(), f64::from(hour))
            .await
            .unwrap();
        job
    }

    #[tokio::test]
    async fn test_no_promotion_outside_low_load() {
        let store = Arc::new(MemoryQueueStore::new());
        defer(&store, "a", 0).await;
        let sweeper = DeferredSweeper::new(store.clone(), &QueueConfig::default());

        assert_eq!(sweeper.promote_due(14).await.unwrap(), 0);
        assert_eq!(store.len("embeddings:scheduled").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_promotes_due_jobs_only() {
        let store = Arc::new(MemoryQueueStore::new());
        let early = defer(&store, "a", 0).await;
        defer(&store, "b", 3).await;
        let sweeper = DeferredSweeper::new(store.clone(), &QueueConfig::default());

        assert_eq!(sweeper.promote_due(1).await.unwrap(), 1);

        let live = store.range("embeddings:queue", 0, -1).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(EmbeddingJob::from_member(&live[0]).unwrap(), early);
        assert_eq!(store.len("embeddings:scheduled").await.unwrap(), 1);

        assert_eq!(sweeper.promote_due(3).await.unwrap(), 1);
        assert_eq!(store.len("embeddings:scheduled").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrapped_target_is_due_for_rest_of_window() {
        let store = Arc::new(MemoryQueueStore::new());
        // Deferred at hour 5, which targets hour 0
        let wrapped = defer(&store, "a", 0).await;
        let sweeper = DeferredSweeper::new(store.clone(), &QueueConfig::default());

        assert_eq!(sweeper.promote_due(5).await.unwrap(), 1);

        let live = store.range("embeddings:queue", 0, -1).await.unwrap();
        assert_eq!(EmbeddingJob::from_member(&live[0]).unwrap(), wrapped);
    }

    #[tokio::test]
    async fn test_wrapped_target_waits_through_business_hours() {
        let store = Arc::new(MemoryQueueStore::new());
        defer(&store, "a", 0).await;
        let sweeper = DeferredSweeper::new(store.clone(), &QueueConfig::default());

        for hour in 6..24 {
            assert_eq!(sweeper.promote_due(hour).await.unwrap(), 0);
        }
        assert_eq!(store.len("embeddings:scheduled").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_promoted_job_keeps_priority_score() {
        let store = Arc::new(MemoryQueueStore::new());
        defer(&store, "a", 0).await;
        let sweeper = DeferredSweeper::new(store.clone(), &QueueConfig::default());

        sweeper.promote_due(0).await.unwrap();

        let scored = store
            .range_by_score("embeddings:queue", 4.0, 4.0)
            .await
            .unwrap();
        assert_eq!(scored.len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_member_is_dropped() {
        let store = Arc::new(MemoryQueueStore::new());
        store.insert("embeddings:scheduled", "garbage", 0.0).await.unwrap();
        let sweeper = DeferredSweeper::new(store.clone(), &QueueConfig::default());

        assert_eq!(sweeper.promote_due(0).await.unwrap(), 0);
        assert_eq!(store.len("embeddings:scheduled").await.unwrap(), 0);
        assert_eq!(store.len("embeddings:queue").await.unwrap(), 0);
    }
}
