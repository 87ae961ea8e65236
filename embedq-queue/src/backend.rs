//! Embedding backend seam.

use async_trait::async_trait;
use embedq_cache::Embedding;
use thiserror::Error;

/// Failure reported by an embedding backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Backend cannot be reached or refused the request
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend did not answer in time
    #[error("backend timed out")]
    Timeout,

    /// Backend answered with something that is not a vector
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

/// Computes embedding vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed `text`.
    async fn generate(&self, text: &str) -> Result<Embedding, BackendError>;

    /// Backend name for logs.
    fn name(&self) -> &str {
        "embedding-backend"
    }
}
