//! Operation kinds and their static scheduling tables.

use embedq_ratelimit::RateLimit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scheduling precedence. Lower values dequeue first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Priority {
    /// Interactive chat retrieval
    Critical = 0,
    /// Memory writes
    High = 1,
    /// Post indexing
    #[default]
    Normal = 2,
    /// ML analysis, only drained during low-load hours
    Low = 3,
    /// Bulk work, only drained during low-load hours
    Background = 4,
}

impl Priority {
    /// All priorities, most urgent first.
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    /// Numeric score used by the ordered queue.
    pub const fn value(self) -> u32 {
        self as u32
    }

    /// Whether jobs at this priority wait for low-load hours in the live queue.
    pub fn is_off_peak_only(self) -> bool {
        self >= Priority::Low
    }

    /// Whether rate-limited jobs at this priority are deferred rather than queued.
    pub fn is_deferrable(self) -> bool {
        self >= Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
            Priority::Background => "BACKGROUND",
        };
        f.write_str(name)
    }
}

/// What a caller wants an embedding for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Retrieval for a live chat turn
    ChatRetrieval,
    /// Storing a memory
    MemoryStorage,
    /// Indexing a post
    PostIndexing,
    /// ML analysis
    MlAnalysis,
    /// Bulk processing
    BatchProcessing,
}

impl Operation {
    /// All operations.
    pub const ALL: [Operation; 5] = [
        Operation::ChatRetrieval,
        Operation::MemoryStorage,
        Operation::PostIndexing,
        Operation::MlAnalysis,
        Operation::BatchProcessing,
    ];

    /// Wire name, also used as the rate-limit bucket name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::ChatRetrieval => "chat_retrieval",
            Operation::MemoryStorage => "memory_storage",
            Operation::PostIndexing => "post_indexing",
            Operation::MlAnalysis => "ml_analysis",
            Operation::BatchProcessing => "batch_processing",
        }
    }

    /// Priority used when the caller does not pick one.
    pub const fn default_priority(self) -> Priority {
        match self {
            Operation::ChatRetrieval => Priority::Critical,
            Operation::MemoryStorage => Priority::High,
            Operation::PostIndexing => Priority::Normal,
            Operation::MlAnalysis => Priority::Low,
            Operation::BatchProcessing => Priority::Background,
        }
    }

    /// Built-in per-minute and per-hour caps.
    pub const fn default_rate_limit(self) -> RateLimit {
        match self {
            Operation::ChatRetrieval => RateLimit::new(100, 3000),
            Operation::MemoryStorage => RateLimit::new(50, 1500),
            Operation::PostIndexing => RateLimit::new(30, 1000),
            Operation::MlAnalysis => RateLimit::new(5, 100),
            Operation::BatchProcessing => RateLimit::new(2, 50),
        }
    }

    /// Whether the operation may use the immediate bypass path.
    pub const fn is_critical(self) -> bool {
        matches!(self, Operation::ChatRetrieval | Operation::MemoryStorage)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation: {}", s))
    }
}
