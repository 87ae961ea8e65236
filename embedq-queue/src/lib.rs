//! Priority-aware embedding generation queue.
//!
//! Provides:
//! - Five operation kinds with static priority and rate-limit tables
//! - A live queue ordered by priority, with demotion on failed attempts
//! - Minute/hour rate limits that defer low-value work instead of dropping it
//! - Low-load hours during which background work drains
//! - An immediate path for interactive operations that skips the queue
//! - A context-aware facade that waits on completion notifications
//!
//! ## Quick Start
//!
//! ```
//! use embedq_queue::testing::ScriptedBackend;
//! use embedq_queue::{EmbeddingQueue, EnqueueOptions, Operation, Priority, QueueConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), embedq_queue::QueueError> {
//! let queue = EmbeddingQueue::in_memory(
//!     Arc::new(ScriptedBackend::new(8)),
//!     QueueConfig::default().with_auto_start(false),
//! )?;
//!
//! let job_id = queue
//!     .enqueue("a new post", Operation::PostIndexing, EnqueueOptions::default())
//!     .await?;
//! assert!(job_id.starts_with("post_indexing_"));
//!
//! let stats = queue.stats().await?;
//! assert_eq!(stats.by_priority[&Priority::Normal], 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Smart facade
//!
//! ```no_run
//! use embedq_queue::*;
//! use std::sync::Arc;
//!
//! # async fn example(backend: Arc<dyn EmbeddingBackend>) -> QueueResult<()> {
//! let smart = SmartEmbeddings::new(EmbeddingQueue::in_memory(backend, QueueConfig::from_env())?);
//!
//! // Interactive: computed right away
//! let chat = smart.get_embedding("hello", EmbeddingRequest::new(Context::Chat)).await?;
//!
//! // Queued, with a direct fallback after the timeout
//! let post = smart.get_embedding("long post", EmbeddingRequest::new(Context::Indexing)).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod job;
pub mod manager;
pub mod operation;
pub mod ratelimit;
pub mod scheduler;
pub mod smart;
pub mod store;
pub mod sweep;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod worker;

pub use backend::{BackendError, EmbeddingBackend};
pub use clock::{Clock, SystemClock};
pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use health::{HealthReport, HealthStatus};
pub use job::{EmbeddingJob, JobId};
pub use manager::{
    Completion, CompletionOutcome, EmbeddingQueue, EmbeddingQueueBuilder, EnqueueOptions,
    QueueStats, Submission, SubmitOptions, TickOutcome,
};
pub use operation::{Operation, Priority};
pub use ratelimit::{OperationRateLimiter, OperationUsage};
pub use scheduler::LowLoadScheduler;
pub use smart::{
    BatchOptions, Context, EmbeddingRequest, SimilarMatch, SimilarityOptions, SmartConfig,
    SmartEmbeddings, cosine_similarity,
};
pub use store::{MemoryQueueStore, OrderedQueueStore};
#[cfg(feature = "redis")]
pub use store::RedisQueueStore;
pub use sweep::DeferredSweeper;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{BackendError, EmbeddingBackend};
    pub use crate::config::QueueConfig;
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::manager::{EmbeddingQueue, EnqueueOptions, QueueStats};
    pub use crate::operation::{Operation, Priority};
    pub use crate::smart::{Context, EmbeddingRequest, SmartEmbeddings};
}
