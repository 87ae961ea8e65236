//! Queue manager.
//!
//! Owns the enqueue/dequeue/process lifecycle. Store layout under the
//! configured prefix:
//!
//! | key | kind | content |
//! |---|---|---|
//! | `{prefix}:queue` | sorted set | live jobs scored by (demoted) priority |
//! | `{prefix}:processing` | set | ids of jobs being processed |
//! | `{prefix}:scheduled` | sorted set | deferred jobs scored by target hour |
//! | `{prefix}:stats:completed` | counter | jobs completed |
//! | `{prefix}:stats:failed` | counter | jobs dropped after the retry budget |
//! | `{prefix}:ratelimit:*` | counters | minute/hour buckets |
//! | `{prefix}:cache:*` | strings | cached vectors |

use crate::backend::EmbeddingBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::health::{self, HealthReport};
use crate::job::{EmbeddingJob, JobId};
use crate::operation::{Operation, Priority};
use crate::ratelimit::{OperationRateLimiter, OperationUsage};
use crate::scheduler::LowLoadScheduler;
use crate::store::{MemoryQueueStore, OrderedQueueStore};
use crate::sweep::DeferredSweeper;
use crate::worker::WorkerState;
use embedq_cache::{CacheConfig, CacheStore, Embedding, EmbeddingCache, MemoryCacheStore};
use embedq_log::{debug, error, info, trace, warn};
use embedq_ratelimit::{CounterStore, MemoryCounterStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Optional enqueue parameters.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Overrides the operation's default priority
    pub priority: Option<Priority>,
    /// Opaque caller id
    pub user_id: Option<String>,
    /// Opaque agent id
    pub agent_id: Option<String>,
}

impl EnqueueOptions {
    /// Options with an explicit priority.
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }
}

/// Parameters for [`EmbeddingQueue::submit`].
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Use the immediate path when the operation allows it
    pub immediate: bool,
    /// Opaque caller id
    pub user_id: Option<String>,
    /// Opaque agent id
    pub agent_id: Option<String>,
}

/// Result of [`EmbeddingQueue::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Computed (or cached) right away
    Embedding(Embedding),
    /// Accepted by the queue
    Queued(JobId),
}

/// Queue introspection snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Jobs in the live queue
    pub total_jobs: usize,
    /// Live jobs per base priority
    pub by_priority: BTreeMap<Priority, usize>,
    /// Jobs currently claimed
    pub processing: usize,
    /// Jobs completed since the counters were created
    pub completed: u64,
    /// Jobs dropped after exhausting retries
    pub failed: u64,
    /// Jobs waiting for a low-load hour
    pub deferred: usize,
    /// Mean age of live jobs in milliseconds
    pub avg_wait_ms: u64,
}

/// What a single processing step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Live queue is empty
    Idle,
    /// Head job waits for a low-load hour
    SkippedOffPeak {
        /// Head job
        job_id: JobId,
    },
    /// Head job's operation is over its rate limit
    SkippedRateLimited {
        /// Head job
        job_id: JobId,
    },
    /// Another processor claimed the head job first
    AlreadyClaimed,
    /// Job finished
    Completed {
        /// Processed job
        job_id: JobId,
        /// Served from the cache without calling the backend
        cached: bool,
    },
    /// Backend failed; job requeued with a demoted score
    Retried {
        /// Processed job
        job_id: JobId,
        /// Attempts failed so far
        retries: u32,
    },
    /// Backend failed and the retry budget is spent
    Failed {
        /// Dropped job
        job_id: JobId,
    },
}

impl TickOutcome {
    /// Whether a job was claimed and handled.
    pub fn claimed_job(&self) -> bool {
        matches!(
            self,
            TickOutcome::Completed { .. } | TickOutcome::Retried { .. } | TickOutcome::Failed { .. }
        )
    }
}

/// Result carried by a [`Completion`].
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// Vector is available (and cached)
    Embedded(Arc<Embedding>),
    /// Attempt failed; job requeued
    Retrying {
        /// Attempts failed so far
        retries: u32,
    },
    /// Job dropped
    Failed(String),
}

/// Published after every processed job and immediate computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Job id, `None` for the immediate path
    pub job_id: Option<JobId>,
    /// Cache key of the job's text
    pub cache_key: String,
    /// What happened
    pub outcome: CompletionOutcome,
}

/// Builder for [`EmbeddingQueue`].
///
/// Stores default to in-memory implementations and the clock to
/// [`SystemClock`].
pub struct EmbeddingQueueBuilder {
    backend: Arc<dyn EmbeddingBackend>,
    config: QueueConfig,
    store: Option<Arc<dyn OrderedQueueStore>>,
    counters: Option<Arc<dyn CounterStore>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EmbeddingQueueBuilder {
    /// Set the configuration.
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the ordered queue store.
    pub fn store(mut self, store: Arc<dyn OrderedQueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the counter store used for rate limits and stats.
    pub fn counters(mut self, counters: Arc<dyn CounterStore>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Set the cache store.
    pub fn cache_store(mut self, cache_store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(cache_store);
        self
    }

    /// Set the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use Redis for every store.
    #[cfg(feature = "redis")]
    pub async fn redis(self, redis_url: &str) -> QueueResult<Self> {
        let store = crate::store::RedisQueueStore::new(redis_url).await?;
        let counters = embedq_ratelimit::RedisCounterStore::new(redis_url).await?;
        let cache_store =
            embedq_cache::RedisCacheStore::new(&CacheConfig::redis(redis_url)).await?;

        Ok(self
            .store(Arc::new(store))
            .counters(Arc::new(counters))
            .cache_store(Arc::new(cache_store)))
    }

    /// Validate the configuration and assemble the queue.
    pub fn build(self) -> QueueResult<EmbeddingQueue> {
        self.config.validate()?;

        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryQueueStore::new()));
        let counters = self
            .counters
            .unwrap_or_else(|| Arc::new(MemoryCounterStore::new()));
        let cache_store = self
            .cache_store
            .unwrap_or_else(|| Arc::new(MemoryCacheStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let cache = EmbeddingCache::new(
            cache_store,
            CacheConfig::memory()
                .with_key_prefix(config.key("cache"))
                .with_ttl(config.cache_ttl),
        )
        .with_max_chars(config.max_text_chars);

        let limiter = OperationRateLimiter::new(counters.clone(), &config, clock.clone());
        let scheduler = LowLoadScheduler::new(store.clone(), &config, clock.clone());
        let sweeper = DeferredSweeper::new(store.clone(), &config);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            { prefix = config.key_prefix, store = store.store_type(), backend = self.backend.name() },
            "Embedding queue ready"
        );

        Ok(EmbeddingQueue {
            inner: Arc::new(Inner {
                queue_key: config.key("queue"),
                processing_key: config.key("processing"),
                completed_key: config.key("stats:completed"),
                failed_key: config.key("stats:failed"),
                config,
                store,
                counters,
                cache,
                backend: self.backend,
                clock,
                limiter,
                scheduler,
                sweeper,
                events,
                worker: WorkerState::default(),
            }),
        })
    }
}

struct Inner {
    config: QueueConfig,
    store: Arc<dyn OrderedQueueStore>,
    counters: Arc<dyn CounterStore>,
    cache: EmbeddingCache,
    backend: Arc<dyn EmbeddingBackend>,
    clock: Arc<dyn Clock>,
    limiter: OperationRateLimiter,
    scheduler: LowLoadScheduler,
    sweeper: DeferredSweeper,
    events: broadcast::Sender<Completion>,
    worker: WorkerState,
    queue_key: String,
    processing_key: String,
    completed_key: String,
    failed_key: String,
}

/// Priority-aware embedding queue.
///
/// Cheap to clone; clones share stores, backend and the processing loop.
///
/// ```
/// use embedq_queue::testing::{ManualClock, ScriptedBackend};
/// use embedq_queue::{EmbeddingQueue, Operation, QueueConfig};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), embedq_queue::QueueError> {
/// let queue = EmbeddingQueue::builder(Arc::new(ScriptedBackend::new(4)))
///     .config(QueueConfig::default().with_auto_start(false))
///     .clock(Arc::new(ManualClock::new(1_700_000_000_000, 14)))
///     .build()?;
///
/// let vector = queue.process_immediate("hello", Operation::ChatRetrieval).await?;
/// assert_eq!(vector.len(), 4);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EmbeddingQueue {
    inner: Arc<Inner>,
}

/// Non-owning queue reference held by the processing task.
pub(crate) struct WeakQueue(Weak<Inner>);

impl WeakQueue {
    /// The queue, unless every owning handle is gone.
    pub(crate) fn upgrade(&self) -> Option<EmbeddingQueue> {
        self.0.upgrade().map(|inner| EmbeddingQueue { inner })
    }
}

impl EmbeddingQueue {
    /// Start building a queue around `backend`.
    pub fn builder(backend: Arc<dyn EmbeddingBackend>) -> EmbeddingQueueBuilder {
        EmbeddingQueueBuilder {
            backend,
            config: QueueConfig::default(),
            store: None,
            counters: None,
            cache_store: None,
            clock: None,
        }
    }

    /// Queue with in-memory stores and the system clock.
    pub fn in_memory(backend: Arc<dyn EmbeddingBackend>, config: QueueConfig) -> QueueResult<Self> {
        Self::builder(backend).config(config).build()
    }

    /// Configuration in use.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Result cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.inner.cache
    }

    /// Queue clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn worker(&self) -> &WorkerState {
        &self.inner.worker
    }

    pub(crate) fn downgrade(&self) -> WeakQueue {
        WeakQueue(Arc::downgrade(&self.inner))
    }

    /// Subscribe to completion notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Completion> {
        self.inner.events.subscribe()
    }

    fn publish(&self, job_id: Option<JobId>, cache_key: String, outcome: CompletionOutcome) {
        // No receivers is fine
        let _ = self.inner.events.send(Completion {
            job_id,
            cache_key,
            outcome,
        });
    }

    /// Cache lookup that degrades to a miss when the cache store fails.
    async fn cached(&self, text: &str) -> Option<Embedding> {
        match self.inner.cache.get(text).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!({ error = e }, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn store_in_cache(&self, text: &str, embedding: &[f32]) {
        if let Err(e) = self.inner.cache.put(text, embedding).await {
            warn!({ error = e }, "Failed to cache embedding");
        }
    }

    /// Add a job for `text`.
    ///
    /// Returns the job id. Nothing is queued when the cache already holds a
    /// vector for `text`. A rate-limited NORMAL-or-lower job is deferred to
    /// the next low-load hour; CRITICAL and HIGH jobs always enter the live
    /// queue.
    pub async fn enqueue(
        &self,
        text: &str,
        operation: Operation,
        options: EnqueueOptions,
    ) -> QueueResult<JobId> {
        let inner = &self.inner;
        let priority = options
            .priority
            .unwrap_or_else(|| operation.default_priority());
        let job = EmbeddingJob::new(
            text,
            operation,
            priority,
            inner.config.max_text_chars,
            inner.clock.now_millis(),
        )
        .with_user_id(options.user_id)
        .with_agent_id(options.agent_id);

        if self.cached(&job.text).await.is_some() {
            debug!({ job_id = job.id, operation = operation }, "Embedding already cached, not queueing");
            return Ok(job.id);
        }

        if !inner.limiter.allow(operation).await? && priority.is_deferrable() {
            inner.scheduler.schedule_for_low_load(&job).await?;
            return Ok(job.id);
        }

        let member = job
            .to_member()
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        inner
            .store
            .insert(&inner.queue_key, &member, job.score(inner.config.retry_demotion))
            .await?;

        info!(
            { job_id = job.id, operation = operation, priority = priority },
            "Job enqueued"
        );

        if inner.config.auto_start {
            self.ensure_processing().await;
        }

        Ok(job.id)
    }

    /// Compute the vector for a critical operation without queueing.
    ///
    /// Bypasses the live queue and the rate limiter; only the cache is
    /// consulted and written.
    ///
    /// # Errors
    ///
    /// [`QueueError::InvalidOperationForImmediate`] for non-critical
    /// operations, [`QueueError::Backend`] when the backend fails.
    pub async fn process_immediate(&self, text: &str, operation: Operation) -> QueueResult<Embedding> {
        if !operation.is_critical() {
            return Err(QueueError::InvalidOperationForImmediate(operation));
        }

        if let Some(hit) = self.cached(text).await {
            return Ok(hit);
        }

        info!({ operation = operation }, "Immediate embedding bypassing queue");
        self.compute_direct(text).await
    }

    /// Call the backend for `text` and cache the result, ignoring queue,
    /// limiter and operation rules.
    pub async fn compute_direct(&self, text: &str) -> QueueResult<Embedding> {
        let text: String = text.chars().take(self.inner.config.max_text_chars).collect();
        let embedding = self.inner.backend.generate(&text).await?;

        self.store_in_cache(&text, &embedding).await;
        self.publish(
            None,
            self.inner.cache.cache_key(&text),
            CompletionOutcome::Embedded(Arc::new(embedding.clone())),
        );
        Ok(embedding)
    }

    /// Immediate when requested and allowed, queued otherwise.
    pub async fn submit(
        &self,
        text: &str,
        operation: Operation,
        options: SubmitOptions,
    ) -> QueueResult<Submission> {
        if options.immediate && operation.is_critical() {
            return self
                .process_immediate(text, operation)
                .await
                .map(Submission::Embedding);
        }

        let job_id = self
            .enqueue(
                text,
                operation,
                EnqueueOptions {
                    priority: None,
                    user_id: options.user_id,
                    agent_id: options.agent_id,
                },
            )
            .await?;
        Ok(Submission::Queued(job_id))
    }

    /// Run one processing step on the head of the live queue.
    pub async fn process_next(&self) -> QueueResult<TickOutcome> {
        let inner = &self.inner;

        let Some(member) = inner
            .store
            .range(&inner.queue_key, 0, 0)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(TickOutcome::Idle);
        };

        let job = match EmbeddingJob::from_member(&member) {
            Ok(job) => job,
            Err(e) => {
                inner.store.remove(&inner.queue_key, &member).await?;
                return Err(QueueError::Deserialization(e.to_string()));
            }
        };

        if job.priority.is_off_peak_only() && !inner.config.is_low_load_hour(inner.clock.local_hour()) {
            trace!({ job_id = job.id, priority = job.priority }, "Waiting for low-load hours");
            return Ok(TickOutcome::SkippedOffPeak { job_id: job.id });
        }

        if !inner.limiter.allow(job.operation).await? {
            debug!({ job_id = job.id, operation = job.operation }, "Rate limited, leaving job queued");
            return Ok(TickOutcome::SkippedRateLimited { job_id: job.id });
        }

        if !inner.store.remove(&inner.queue_key, &member).await? {
            return Ok(TickOutcome::AlreadyClaimed);
        }
        inner.store.set_add(&inner.processing_key, &job.id).await?;

        let outcome = self.execute(&job).await;

        inner.store.set_remove(&inner.processing_key, &job.id).await?;
        outcome
    }

    async fn execute(&self, job: &EmbeddingJob) -> QueueResult<TickOutcome> {
        let inner = &self.inner;
        let cache_key = inner.cache.cache_key(&job.text);

        if let Some(hit) = self.cached(&job.text).await {
            inner.counters.increment(&inner.completed_key, None).await?;
            debug!({ job_id = job.id }, "Embedding cached while queued, skipping backend");
            self.publish(
                Some(job.id.clone()),
                cache_key,
                CompletionOutcome::Embedded(Arc::new(hit)),
            );
            return Ok(TickOutcome::Completed {
                job_id: job.id.clone(),
                cached: true,
            });
        }

        debug!({ job_id = job.id, operation = job.operation }, "Generating embedding");

        match inner.backend.generate(&job.text).await {
            Ok(embedding) => {
                self.store_in_cache(&job.text, &embedding).await;
                inner.counters.increment(&inner.completed_key, None).await?;

                info!({ job_id = job.id, operation = job.operation }, "Embedding processed");
                self.publish(
                    Some(job.id.clone()),
                    cache_key,
                    CompletionOutcome::Embedded(Arc::new(embedding)),
                );
                Ok(TickOutcome::Completed {
                    job_id: job.id.clone(),
                    cached: false,
                })
            }
            Err(e) if job.retries < inner.config.max_retries => {
                let retry = job.next_attempt();
                let member = retry
                    .to_member()
                    .map_err(|e| QueueError::Serialization(e.to_string()))?;
                inner
                    .store
                    .insert(&inner.queue_key, &member, retry.score(inner.config.retry_demotion))
                    .await?;

                warn!(
                    { job_id = job.id, retries = retry.retries, error = e },
                    "Embedding failed, requeued with demoted priority"
                );
                self.publish(
                    Some(job.id.clone()),
                    cache_key,
                    CompletionOutcome::Retrying {
                        retries: retry.retries,
                    },
                );
                Ok(TickOutcome::Retried {
                    job_id: job.id.clone(),
                    retries: retry.retries,
                })
            }
            Err(e) => {
                inner.counters.increment(&inner.failed_key, None).await?;

                error!(
                    { job_id = job.id, retries = job.retries, error = e },
                    "Embedding failed permanently"
                );
                self.publish(
                    Some(job.id.clone()),
                    cache_key,
                    CompletionOutcome::Failed(e.to_string()),
                );
                Ok(TickOutcome::Failed {
                    job_id: job.id.clone(),
                })
            }
        }
    }

    /// Promote deferred jobs whose hour has come.
    pub async fn sweep_deferred(&self) -> QueueResult<usize> {
        self.inner
            .sweeper
            .promote_due(self.inner.clock.local_hour())
            .await
    }

    /// Number of jobs waiting for a low-load hour.
    pub async fn deferred_len(&self) -> QueueResult<usize> {
        self.inner.scheduler.len().await
    }

    /// Snapshot of queue state. Read-only.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let inner = &self.inner;
        let now = inner.clock.now_millis();
        let members = inner.store.range(&inner.queue_key, 0, -1).await?;

        let mut by_priority: BTreeMap<Priority, usize> =
            Priority::ALL.into_iter().map(|p| (p, 0)).collect();
        let mut total_wait: i64 = 0;
        let mut readable = 0usize;

        for member in &members {
            match EmbeddingJob::from_member(member) {
                Ok(job) => {
                    *by_priority.entry(job.priority).or_default() += 1;
                    total_wait += job.age_ms(now);
                    readable += 1;
                }
                Err(e) => warn!({ error = e }, "Unreadable job in live queue"),
            }
        }

        let avg_wait_ms = if readable == 0 {
            0
        } else {
            (total_wait / readable as i64) as u64
        };

        Ok(QueueStats {
            total_jobs: members.len(),
            by_priority,
            processing: inner.store.set_len(&inner.processing_key).await?,
            completed: inner.counters.get(&inner.completed_key).await?,
            failed: inner.counters.get(&inner.failed_key).await?,
            deferred: inner.scheduler.len().await?,
            avg_wait_ms,
        })
    }

    /// Current rate counters for every operation. Does not consume budget.
    pub async fn rate_usage(&self) -> QueueResult<BTreeMap<Operation, OperationUsage>> {
        let mut usage = BTreeMap::new();
        for operation in Operation::ALL {
            usage.insert(operation, self.inner.limiter.usage(operation).await?);
        }
        Ok(usage)
    }

    /// Health score derived from stats and rate usage.
    pub async fn health(&self) -> QueueResult<HealthReport> {
        let stats = self.stats().await?;
        let usage = self.rate_usage().await?;
        Ok(health::assess(&stats, &usage))
    }

    /// Empty the live queue and the processing set. Leaves cache, counters
    /// and deferred jobs alone.
    pub async fn clear(&self) -> QueueResult<()> {
        let inner = &self.inner;
        inner.store.delete(&inner.queue_key).await?;
        inner.store.delete(&inner.processing_key).await?;
        info!("Embedding queue cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, ScriptedBackend};
    use embedq_ratelimit::RateLimit;

    const NOW: i64 = 1_700_000_000_000;

    struct Fixture {
        queue: EmbeddingQueue,
        backend: Arc<ScriptedBackend>,
        clock: Arc<ManualClock>,
        store: Arc<MemoryQueueStore>,
    }

    fn fixture_with(config: QueueConfig, hour: u32) -> Fixture {
        let backend = Arc::new(ScriptedBackend::new(8));
        let clock = Arc::new(ManualClock::new(NOW, hour));
        let store = Arc::new(MemoryQueueStore::new());
        let queue = EmbeddingQueue::builder(backend.clone())
            .config(config.with_auto_start(false))
            .clock(clock.clone())
            .store(store.clone())
            .build()
            .unwrap();
        Fixture {
            queue,
            backend,
            clock,
            store,
        }
    }

    fn fixture(hour: u32) -> Fixture {
        fixture_with(QueueConfig::default(), hour)
    }

    #[tokio::test]
    async fn test_enqueue_places_job_in_live_queue() {
        let f = fixture(14);
        let id = f
            .queue
            .enqueue("post body", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();

        assert!(id.starts_with("post_indexing_"));
        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.total_jobs, 1);
        assert_eq!(stats.by_priority[&Priority::Normal], 1);
        assert_eq!(stats.by_priority[&Priority::Critical], 0);
    }

    #[tokio::test]
    async fn test_enqueue_skips_cached_text() {
        let f = fixture(14);
        f.queue.cache().put("known", &[1.0]).await.unwrap();

        f.queue
            .enqueue("known", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();

        assert_eq!(f.queue.stats().await.unwrap().total_jobs, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_low_priority_is_deferred() {
        let f = fixture(14);
        for i in 0..5 {
            f.queue
                .enqueue(&format!("t{}", i), Operation::MlAnalysis, EnqueueOptions::default())
                .await
                .unwrap();
        }
        f.queue
            .enqueue("t5", Operation::MlAnalysis, EnqueueOptions::default())
            .await
            .unwrap();

        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.total_jobs, 5);
        assert_eq!(stats.deferred, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_high_priority_stays_live() {
        let config = QueueConfig::default().with_rate_limit(Operation::MemoryStorage, RateLimit::new(1, 10));
        let f = fixture_with(config, 14);

        f.queue
            .enqueue("a", Operation::MemoryStorage, EnqueueOptions::default())
            .await
            .unwrap();
        f.queue
            .enqueue("b", Operation::MemoryStorage, EnqueueOptions::default())
            .await
            .unwrap();

        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.total_jobs, 2);
        assert_eq!(stats.deferred, 0);
    }

    #[tokio::test]
    async fn test_process_next_completes_and_caches() {
        let f = fixture(14);
        f.queue
            .enqueue("hello", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();

        let outcome = f.queue.process_next().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Completed { cached: false, .. }));
        assert_eq!(f.backend.calls(), 1);
        assert_eq!(
            f.queue.cache().get("hello").await.unwrap(),
            Some(f.backend.vector_for("hello"))
        );

        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.total_jobs, 0);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.completed, 1);
        assert_eq!(f.queue.process_next().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_process_next_uses_cache_filled_while_queued() {
        let f = fixture(14);
        f.queue
            .enqueue("dup", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();
        f.queue.cache().put("dup", &[0.5]).await.unwrap();

        let outcome = f.queue.process_next().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Completed { cached: true, .. }));
        assert_eq!(f.backend.calls(), 0);
        assert_eq!(f.queue.stats().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_low_priority_waits_for_low_load_hour() {
        let f = fixture(14);
        f.queue
            .enqueue("analysis", Operation::MlAnalysis, EnqueueOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            f.queue.process_next().await.unwrap(),
            TickOutcome::SkippedOffPeak { .. }
        ));
        assert_eq!(f.queue.stats().await.unwrap().total_jobs, 1);

        f.clock.set_hour(3);
        assert!(f.queue.process_next().await.unwrap().claimed_job());
    }

    #[tokio::test]
    async fn test_tick_rate_limit_leaves_job_queued() {
        let config = QueueConfig::default().with_rate_limit(Operation::PostIndexing, RateLimit::new(1, 10));
        let f = fixture_with(config, 14);

        // Enqueue consumes the only unit of budget
        f.queue
            .enqueue("x", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            f.queue.process_next().await.unwrap(),
            TickOutcome::SkippedRateLimited { .. }
        ));
        assert_eq!(f.queue.stats().await.unwrap().total_jobs, 1);

        f.clock.advance_millis(60_000);
        assert!(f.queue.process_next().await.unwrap().claimed_job());
    }

    #[tokio::test]
    async fn test_failed_job_is_demoted() {
        let f = fixture(14);
        f.backend.fail_next(1);
        f.queue
            .enqueue("memo", Operation::MemoryStorage, EnqueueOptions::default())
            .await
            .unwrap();

        let outcome = f.queue.process_next().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Retried { retries: 1, .. }));

        let demoted = f
            .store
            .range_by_score("embeddings:queue", 11.0, 11.0)
            .await
            .unwrap();
        assert_eq!(demoted.len(), 1);
        let job = EmbeddingJob::from_member(&demoted[0].0).unwrap();
        assert_eq!(job.retries, 1);
        assert_eq!(job.priority, Priority::High);

        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.by_priority[&Priority::High], 1);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn test_retry_budget() {
        let f = fixture(14);
        f.backend.fail_always(true);
        f.queue
            .enqueue("doomed", Operation::ChatRetrieval, EnqueueOptions::default())
            .await
            .unwrap();

        for expected in 1..=3 {
            let outcome = f.queue.process_next().await.unwrap();
            assert!(matches!(outcome, TickOutcome::Retried { retries, .. } if retries == expected));
        }
        assert!(matches!(
            f.queue.process_next().await.unwrap(),
            TickOutcome::Failed { .. }
        ));

        assert_eq!(f.backend.calls(), 4);
        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.total_jobs, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
    }

    #[tokio::test]
    async fn test_process_immediate_rejects_non_critical() {
        let f = fixture(14);
        let err = f
            .queue
            .process_immediate("hello world", Operation::MlAnalysis)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueueError::InvalidOperationForImmediate(Operation::MlAnalysis)
        ));
        assert_eq!(f.backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_process_immediate_ignores_rate_limit() {
        let config = QueueConfig::default().with_rate_limit(Operation::ChatRetrieval, RateLimit::new(1, 1));
        let f = fixture_with(config, 14);

        for i in 0..5 {
            f.queue
                .process_immediate(&format!("q{}", i), Operation::ChatRetrieval)
                .await
                .unwrap();
        }

        assert_eq!(f.backend.calls(), 5);
        let usage = f.queue.rate_usage().await.unwrap();
        assert_eq!(usage[&Operation::ChatRetrieval].current_minute, 0);
    }

    #[tokio::test]
    async fn test_process_immediate_uses_cache() {
        let f = fixture(14);
        let first = f
            .queue
            .process_immediate("same", Operation::MemoryStorage)
            .await
            .unwrap();
        let second = f
            .queue
            .process_immediate("same", Operation::MemoryStorage)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(f.backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_process_immediate_backend_error() {
        let f = fixture(14);
        f.backend.fail_next(1);

        let err = f
            .queue
            .process_immediate("x", Operation::ChatRetrieval)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Backend(_)));
    }

    #[tokio::test]
    async fn test_submit() {
        let f = fixture(14);

        let immediate = f
            .queue
            .submit(
                "chat",
                Operation::ChatRetrieval,
                SubmitOptions {
                    immediate: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(immediate, Submission::Embedding(ref v) if v.len() == 8));

        // Non-critical operations are queued even when immediate is asked for
        let queued = f
            .queue
            .submit(
                "post",
                Operation::PostIndexing,
                SubmitOptions {
                    immediate: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(queued, Submission::Queued(_)));
    }

    #[tokio::test]
    async fn test_completion_events() {
        let f = fixture(14);
        let mut events = f.queue.subscribe();

        f.queue
            .enqueue("evt", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();
        f.queue.process_next().await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.cache_key, f.queue.cache().cache_key("evt"));
        assert!(event.job_id.is_some());
        assert!(matches!(event.outcome, CompletionOutcome::Embedded(ref v) if v.len() == 8));
    }

    #[tokio::test]
    async fn test_stats_avg_wait() {
        let f = fixture(14);
        f.queue
            .enqueue("a", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();
        f.clock.advance_millis(1_000);
        f.queue
            .enqueue("b", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();
        f.clock.advance_millis(1_000);

        assert_eq!(f.queue.stats().await.unwrap().avg_wait_ms, 1_500);
    }

    #[tokio::test]
    async fn test_stats_is_read_only() {
        let f = fixture(14);
        f.queue
            .enqueue("a", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();

        let before = f.queue.stats().await.unwrap();
        let after = f.queue.stats().await.unwrap();
        assert_eq!(before, after);
        assert_eq!(f.queue.rate_usage().await.unwrap()[&Operation::PostIndexing].current_minute, 1);
    }

    #[tokio::test]
    async fn test_clear_keeps_cache_and_deferred() {
        let f = fixture(14);
        f.queue.cache().put("kept", &[1.0]).await.unwrap();
        f.queue
            .enqueue("a", Operation::PostIndexing, EnqueueOptions::default())
            .await
            .unwrap();
        f.store.insert("embeddings:scheduled", "parked", 0.0).await.unwrap();
        f.store.set_add("embeddings:processing", "stuck").await.unwrap();

        f.queue.clear().await.unwrap();

        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.total_jobs, 0);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.deferred, 1);
        assert!(f.queue.cache().contains("kept").await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_head_is_removed() {
        let f = fixture(14);
        f.store.insert("embeddings:queue", "{not json", 0.0).await.unwrap();

        assert!(matches!(
            f.queue.process_next().await,
            Err(QueueError::Deserialization(_))
        ));
        assert_eq!(f.queue.process_next().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_sweep_promotes_during_low_load() {
        let config = QueueConfig::default().with_rate_limit(Operation::BatchProcessing, RateLimit::new(1, 10));
        let f = fixture_with(config, 14);

        f.queue
            .enqueue("a", Operation::BatchProcessing, EnqueueOptions::default())
            .await
            .unwrap();
        f.queue
            .enqueue("b", Operation::BatchProcessing, EnqueueOptions::default())
            .await
            .unwrap();
        assert_eq!(f.queue.deferred_len().await.unwrap(), 1);

        assert_eq!(f.queue.sweep_deferred().await.unwrap(), 0);

        f.clock.set_hour(0);
        assert_eq!(f.queue.sweep_deferred().await.unwrap(), 1);
        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.deferred, 0);
        assert_eq!(stats.total_jobs, 2);
    }
}
