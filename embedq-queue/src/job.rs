//! Embedding job definition.

use crate::operation::{Operation, Priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job unique identifier, e.g. `ml_analysis_1700000000000_3f9a0c1b2`.
pub type JobId = String;

/// A unit of embedding work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingJob {
    /// Unique job identifier
    pub id: JobId,

    /// Input text, already truncated
    pub text: String,

    /// Operation kind
    pub operation: Operation,

    /// Base priority; demotion only affects the queue score
    pub priority: Priority,

    /// Opaque caller correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Opaque agent correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Enqueue timestamp
    pub created_at: DateTime<Utc>,

    /// Failed attempts so far
    #[serde(default)]
    pub retries: u32,
}

impl EmbeddingJob {
    /// Create a job at `now_ms`, keeping at most `max_chars` characters of `text`.
    pub fn new(
        text: &str,
        operation: Operation,
        priority: Priority,
        max_chars: usize,
        now_ms: i64,
    ) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}_{}_{}", operation, now_ms, &suffix[..9]),
            text: text.chars().take(max_chars).collect(),
            operation,
            priority,
            user_id: None,
            agent_id: None,
            created_at: DateTime::from_timestamp_millis(now_ms).unwrap_or_default(),
            retries: 0,
        }
    }

    /// Attach a user id.
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Attach an agent id.
    pub fn with_agent_id(mut self, agent_id: Option<String>) -> Self {
        self.agent_id = agent_id;
        self
    }

    /// Ordered-queue score. A job that has failed before sits `demotion`
    /// places behind its base priority.
    pub fn score(&self, demotion: u32) -> f64 {
        let penalty = if self.retries > 0 { demotion } else { 0 };
        f64::from(self.priority.value() + penalty)
    }

    /// Copy of this job for its next attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            retries: self.retries + 1,
            ..self.clone()
        }
    }

    /// Milliseconds since the job was created.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.created_at.timestamp_millis()).max(0)
    }

    /// Serialize for the ordered store.
    pub fn to_member(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse an ordered-store member.
    pub fn from_member(member: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_job_id_format() {
        let job = EmbeddingJob::new("hi", Operation::MlAnalysis, Priority::Low, 5000, NOW);
        let prefix = format!("ml_analysis_{}_", NOW);
        assert!(job.id.starts_with(&prefix));
        assert_eq!(job.id.len(), prefix.len() + 9);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = EmbeddingJob::new("x", Operation::PostIndexing, Priority::Normal, 5000, NOW);
        let b = EmbeddingJob::new("x", Operation::PostIndexing, Priority::Normal, 5000, NOW);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_text_truncated_by_chars() {
        let text = "ñ".repeat(10);
        let job = EmbeddingJob::new(&text, Operation::PostIndexing, Priority::Normal, 4, NOW);
        assert_eq!(job.text, "ññññ");
    }

    #[test]
    fn test_created_at_from_clock() {
        let job = EmbeddingJob::new("x", Operation::ChatRetrieval, Priority::Critical, 10, NOW);
        assert_eq!(job.created_at.timestamp_millis(), NOW);
        assert_eq!(job.age_ms(NOW + 250), 250);
        assert_eq!(job.age_ms(NOW - 5), 0);
    }

    #[test]
    fn test_score_demotion_is_not_cumulative() {
        let job = EmbeddingJob::new("x", Operation::MemoryStorage, Priority::High, 10, NOW);
        assert_eq!(job.score(10), 1.0);

        let retried = job.next_attempt();
        assert_eq!(retried.retries, 1);
        assert_eq!(retried.score(10), 11.0);

        let again = retried.next_attempt();
        assert_eq!(again.retries, 2);
        assert_eq!(again.score(10), 11.0);
        assert_eq!(again.priority, Priority::High);
    }

    #[test]
    fn test_member_roundtrip_keeps_ids() {
        let job = EmbeddingJob::new("x", Operation::MlAnalysis, Priority::Low, 10, NOW)
            .with_user_id(Some("u1".into()))
            .with_agent_id(None);
        let member = job.to_member().unwrap();

        assert!(!member.contains("agent_id"));
        assert_eq!(EmbeddingJob::from_member(&member).unwrap(), job);
    }
}
