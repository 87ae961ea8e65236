//! # embedq rate limiting
//!
//! Minute/hour rate limiting for the embedding queue, backed by an atomic
//! counter store.
//!
//! ## Features
//!
//! - **Two fixed windows**: per-minute and per-hour caps checked together
//! - **Bucketed counters**: keys are derived from integer-divided timestamps
//!   and expire on their own, so no reset logic is needed
//! - **Storage Backends**: In-memory (DashMap) and Redis (`redis` feature)
//!
//! ## Quick Start
//!
//! ```rust
//! use embedq_ratelimit::{MemoryCounterStore, RateLimit, WindowedRateLimiter};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = WindowedRateLimiter::new(Arc::new(MemoryCounterStore::new()), "embeddings:ratelimit");
//! let limit = RateLimit::new(5, 100);
//!
//! let decision = limiter.check("ml_analysis", limit).await?;
//! assert!(decision.is_allowed());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod limiter;
pub mod stores;

pub use error::{RateLimitError, RateLimitResult};
pub use limiter::{Decision, RateLimit, Window, WindowUsage, WindowedRateLimiter};
pub use stores::{CounterStore, MemoryCounterStore};

#[cfg(feature = "redis")]
pub use stores::RedisCounterStore;
