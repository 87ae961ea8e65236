//! Caller-facing embedding facade.
//!
//! Maps a caller context to an operation and picks the immediate or queued
//! path. Queued requests wait on completion notifications with a deadline
//! and fall back to a direct backend call so a caller never hangs.

use crate::error::QueueResult;
use crate::manager::{Completion, CompletionOutcome, EmbeddingQueue, EnqueueOptions};
use crate::operation::{Operation, Priority};
use embedq_cache::Embedding;
use embedq_log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

/// Why the caller needs an embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    /// Live chat
    Chat,
    /// Memory write
    Memory,
    /// Search query, shares the chat rate budget
    Search,
    /// Content indexing
    Indexing,
    /// ML analysis
    Ml,
    /// Bulk work
    Batch,
}

impl Context {
    /// Operation this context maps to.
    pub const fn operation(self) -> Operation {
        match self {
            Context::Chat | Context::Search => Operation::ChatRetrieval,
            Context::Memory => Operation::MemoryStorage,
            Context::Indexing => Operation::PostIndexing,
            Context::Ml => Operation::MlAnalysis,
            Context::Batch => Operation::BatchProcessing,
        }
    }

    /// Whether requests bypass the queue.
    pub const fn is_immediate(self) -> bool {
        matches!(self, Context::Chat | Context::Memory)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Context::Chat => "chat",
            Context::Memory => "memory",
            Context::Search => "search",
            Context::Indexing => "indexing",
            Context::Ml => "ml",
            Context::Batch => "batch",
        })
    }
}

impl FromStr for Context {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Context::Chat),
            "memory" => Ok(Context::Memory),
            "search" => Ok(Context::Search),
            "indexing" => Ok(Context::Indexing),
            "ml" => Ok(Context::Ml),
            "batch" => Ok(Context::Batch),
            other => Err(format!("unknown context: {}", other)),
        }
    }
}

/// Facade timing.
#[derive(Debug, Clone)]
pub struct SmartConfig {
    /// Cache re-check cadence when notifications are unavailable
    pub poll_interval: Duration,
    /// Wait for a queued request before falling back
    pub default_timeout: Duration,
    /// Wait per batch item before giving up on it
    pub batch_item_timeout: Duration,
}

impl Default for SmartConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            default_timeout: Duration::from_secs(30),
            batch_item_timeout: Duration::from_secs(60),
        }
    }
}

/// Parameters for [`SmartEmbeddings::get_embedding`].
#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    /// Caller context
    pub context: Context,
    /// Opaque caller id
    pub user_id: Option<String>,
    /// Opaque agent id
    pub agent_id: Option<String>,
    /// Overrides [`SmartConfig::default_timeout`]
    pub timeout: Option<Duration>,
}

impl EmbeddingRequest {
    /// Request for `context` with defaults.
    pub fn new(context: Context) -> Self {
        Self {
            context,
            user_id: None,
            agent_id: None,
            timeout: None,
        }
    }

    /// Set the wait timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Progress callback: `(resolved, total)`.
pub type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Parameters for [`SmartEmbeddings::get_batch_embeddings`].
pub struct BatchOptions {
    /// Caller context; decides the operation, not the priority
    pub context: Context,
    /// Called after each item resolves
    pub on_progress: Option<ProgressFn>,
}

impl BatchOptions {
    /// Options for `context` without progress reporting.
    pub fn new(context: Context) -> Self {
        Self {
            context,
            on_progress: None,
        }
    }

    /// Report progress.
    pub fn with_progress(mut self, on_progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }
}

/// Parameters for [`SmartEmbeddings::find_similar`].
#[derive(Debug, Clone, Copy)]
pub struct SimilarityOptions {
    /// Maximum matches returned
    pub top_k: usize,
    /// Minimum cosine similarity
    pub threshold: f32,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.7,
        }
    }
}

/// A ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarMatch {
    /// Position in the candidate list
    pub index: usize,
    /// Candidate text
    pub text: String,
    /// Cosine similarity to the query
    pub similarity: f32,
}

/// Cosine similarity; 0 for empty, zero or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a > 0.0 && mag_b > 0.0 {
        dot / (mag_a * mag_b)
    } else {
        0.0
    }
}

enum Wait {
    Ready(Embedding),
    Failed,
    TimedOut,
}

/// Waits for queued results, remembering failures seen along the way.
struct Waiter<'a> {
    queue: &'a EmbeddingQueue,
    events: broadcast::Receiver<Completion>,
    poll_interval: Duration,
    failed: HashSet<String>,
}

impl<'a> Waiter<'a> {
    fn new(queue: &'a EmbeddingQueue, poll_interval: Duration) -> Self {
        Self {
            queue,
            events: queue.subscribe(),
            poll_interval,
            failed: HashSet::new(),
        }
    }

    async fn cached(&self, cache_key: &str) -> Option<Embedding> {
        match self.queue.cache().get_by_key(cache_key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!({ error = e }, "Cache lookup failed while waiting, treating as miss");
                None
            }
        }
    }

    async fn wait(&mut self, cache_key: &str, timeout: Duration) -> Wait {
        let deadline = Instant::now() + timeout;

        if let Some(hit) = self.cached(cache_key).await {
            return Wait::Ready(hit);
        }
        if self.failed.contains(cache_key) {
            return Wait::Failed;
        }

        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_) => {
                    return match self.cached(cache_key).await {
                        Some(hit) => Wait::Ready(hit),
                        None => Wait::TimedOut,
                    };
                }
                Ok(Ok(event)) => match event.outcome {
                    CompletionOutcome::Embedded(embedding) if event.cache_key == cache_key => {
                        return Wait::Ready(embedding.as_ref().clone());
                    }
                    CompletionOutcome::Failed(_) if event.cache_key == cache_key => {
                        return Wait::Failed;
                    }
                    CompletionOutcome::Failed(_) => {
                        self.failed.insert(event.cache_key);
                    }
                    _ => {}
                },
                Ok(Err(RecvError::Lagged(skipped))) => {
                    debug!({ skipped = skipped }, "Completion stream lagged, checking cache");
                    if let Some(hit) = self.cached(cache_key).await {
                        return Wait::Ready(hit);
                    }
                }
                Ok(Err(RecvError::Closed)) => return self.poll(cache_key, deadline).await,
            }
        }
    }

    async fn poll(&self, cache_key: &str, deadline: Instant) -> Wait {
        while Instant::now() < deadline {
            if let Some(hit) = self.cached(cache_key).await {
                return Wait::Ready(hit);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Wait::TimedOut
    }
}

/// Context-aware entry point over an [`EmbeddingQueue`].
///
/// ```
/// use embedq_queue::testing::ScriptedBackend;
/// use embedq_queue::{Context, EmbeddingQueue, EmbeddingRequest, QueueConfig, SmartEmbeddings};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), embedq_queue::QueueError> {
/// let queue = EmbeddingQueue::in_memory(Arc::new(ScriptedBackend::new(16)), QueueConfig::default())?;
/// let smart = SmartEmbeddings::new(queue);
///
/// let vector = smart.get_embedding("hi", EmbeddingRequest::new(Context::Chat)).await?;
/// assert_eq!(vector.len(), 16);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SmartEmbeddings {
    queue: EmbeddingQueue,
    config: SmartConfig,
}

impl SmartEmbeddings {
    /// Facade with default timing.
    pub fn new(queue: EmbeddingQueue) -> Self {
        Self::with_config(queue, SmartConfig::default())
    }

    /// Facade with custom timing.
    pub fn with_config(queue: EmbeddingQueue, config: SmartConfig) -> Self {
        Self { queue, config }
    }

    /// Underlying queue.
    pub fn queue(&self) -> &EmbeddingQueue {
        &self.queue
    }

    /// Embedding for `text`.
    ///
    /// `chat` and `memory` go through the immediate path. Everything else is
    /// queued; if no result arrives before the timeout (or the job fails) the
    /// backend is called directly.
    pub async fn get_embedding(&self, text: &str, request: EmbeddingRequest) -> QueueResult<Embedding> {
        let operation = request.context.operation();

        if request.context.is_immediate() {
            return self.queue.process_immediate(text, operation).await;
        }

        let mut waiter = Waiter::new(&self.queue, self.config.poll_interval);
        let job_id = self
            .queue
            .enqueue(
                text,
                operation,
                EnqueueOptions {
                    priority: None,
                    user_id: request.user_id,
                    agent_id: request.agent_id,
                },
            )
            .await?;

        let cache_key = self.queue.cache().cache_key(text);
        let timeout = request.timeout.unwrap_or(self.config.default_timeout);

        match waiter.wait(&cache_key, timeout).await {
            Wait::Ready(embedding) => Ok(embedding),
            Wait::Failed => {
                warn!({ job_id = job_id }, "Queued embedding failed, calling backend directly");
                self.queue.compute_direct(text).await
            }
            Wait::TimedOut => {
                warn!(
                    { job_id = job_id, timeout_ms = timeout.as_millis() },
                    "Queued embedding timed out, calling backend directly"
                );
                self.queue.compute_direct(text).await
            }
        }
    }

    /// Embeddings for many texts at BACKGROUND priority.
    ///
    /// Items are awaited in order; one that does not resolve in
    /// `batch_item_timeout` yields an empty vector.
    pub async fn get_batch_embeddings<S: AsRef<str>>(
        &self,
        texts: &[S],
        options: BatchOptions,
    ) -> QueueResult<Vec<Embedding>> {
        let operation = options.context.operation();
        let mut waiter = Waiter::new(&self.queue, self.config.poll_interval);

        for text in texts {
            self.queue
                .enqueue(
                    text.as_ref(),
                    operation,
                    EnqueueOptions::with_priority(Priority::Background),
                )
                .await?;
        }

        let total = texts.len();
        let mut results = Vec::with_capacity(total);

        for (i, text) in texts.iter().enumerate() {
            let cache_key = self.queue.cache().cache_key(text.as_ref());
            let embedding = match waiter.wait(&cache_key, self.config.batch_item_timeout).await {
                Wait::Ready(embedding) => embedding,
                Wait::Failed | Wait::TimedOut => {
                    debug!({ index = i, cache_key = cache_key }, "Batch item unresolved");
                    Vec::new()
                }
            };
            results.push(embedding);

            if let Some(on_progress) = &options.on_progress {
                on_progress(i + 1, total);
            }
        }

        Ok(results)
    }

    /// Rank `candidates` by cosine similarity to `query`.
    ///
    /// The query is embedded with `search` priority, candidates with `ml`.
    /// Matches below the threshold are dropped; ties keep input order.
    pub async fn find_similar<S: AsRef<str>>(
        &self,
        query: &str,
        candidates: &[S],
        options: SimilarityOptions,
    ) -> QueueResult<Vec<SimilarMatch>> {
        let query_embedding = self
            .get_embedding(query, EmbeddingRequest::new(Context::Search))
            .await?;

        let mut matches = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            let embedding = self
                .get_embedding(candidate.as_ref(), EmbeddingRequest::new(Context::Ml))
                .await?;
            let similarity = cosine_similarity(&query_embedding, &embedding);

            if similarity >= options.threshold {
                matches.push(SimilarMatch {
                    index,
                    text: candidate.as_ref().to_string(),
                    similarity,
                });
            }
        }

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(options.top_k);
        Ok(matches)
    }
}
