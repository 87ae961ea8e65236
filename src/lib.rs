// embedq - a priority-aware embedding generation queue
//
// This library schedules embedding work by operation priority, enforces
// per-operation rate limits, caches results and drains background work
// during low-load hours.

// Re-export the queue and facade
pub use embedq_queue::*;

// Re-export building blocks
pub use embedq_cache;
pub use embedq_log;
pub use embedq_ratelimit;

// Prelude for common imports
pub mod prelude {
    pub use embedq_queue::prelude::*;
    pub use embedq_queue::{
        Completion, CompletionOutcome, EnqueueOptions, HealthReport, HealthStatus, SubmitOptions,
        Submission,
    };
    pub use embedq_ratelimit::RateLimit;
}
