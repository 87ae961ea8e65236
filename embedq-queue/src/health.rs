//! Queue health scoring.

use crate::manager::QueueStats;
use crate::operation::Operation;
use crate::ratelimit::OperationUsage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Live jobs above which the queue counts as backed up.
pub const QUEUE_DEPTH_WARN: usize = 100;
/// Live jobs above which the queue counts as overloaded.
pub const QUEUE_DEPTH_CRITICAL: usize = 1000;
/// Claimed jobs above which processing counts as stuck.
pub const PROCESSING_WARN: usize = 10;
/// Rate saturation at which an operation counts as throttled.
pub const SATURATION_WARN: f64 = 0.9;

/// Overall condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Score 80 and above
    Healthy,
    /// Score 50 to 79
    Degraded,
    /// Score below 50
    Critical,
}

impl HealthStatus {
    fn from_score(score: u8) -> Self {
        match score {
            80.. => HealthStatus::Healthy,
            50..=79 => HealthStatus::Degraded,
            _ => HealthStatus::Critical,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
        })
    }
}

/// Health score with suggested actions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// 0 to 100
    pub score: u8,
    /// Bucketed score
    pub status: HealthStatus,
    /// Human-readable suggestions
    pub recommendations: Vec<String>,
}

/// Score queue state. Deductions: queue depth up to 30, failure ratio up to
/// 30, stuck processing 10, and 10 per throttled operation.
pub fn assess(stats: &QueueStats, usage: &BTreeMap<Operation, OperationUsage>) -> HealthReport {
    let mut penalty: u32 = 0;
    let mut recommendations = Vec::new();

    if stats.total_jobs > QUEUE_DEPTH_CRITICAL {
        penalty += 30;
        recommendations.push(format!(
            "Queue holds {} jobs; add processing capacity or raise jobs_per_tick",
            stats.total_jobs
        ));
    } else if stats.total_jobs > QUEUE_DEPTH_WARN {
        penalty += 15;
        recommendations.push(format!(
            "Queue holds {} jobs; consider raising jobs_per_tick",
            stats.total_jobs
        ));
    }

    let attempts = stats.completed + stats.failed;
    if attempts > 0 {
        let failure_ratio = stats.failed as f64 / attempts as f64;
        if failure_ratio > 0.10 {
            penalty += 30;
            recommendations.push(format!(
                "{:.0}% of jobs failed; check the embedding backend",
                failure_ratio * 100.0
            ));
        } else if failure_ratio > 0.05 {
            penalty += 15;
            recommendations.push(format!(
                "{:.0}% of jobs failed; monitor the embedding backend",
                failure_ratio * 100.0
            ));
        }
    }

    if stats.processing > PROCESSING_WARN {
        penalty += 10;
        recommendations.push(format!(
            "{} jobs are stuck in processing; inspect or clear the queue",
            stats.processing
        ));
    }

    for (operation, usage) in usage {
        if usage.saturation() >= SATURATION_WARN {
            penalty += 10;
            recommendations.push(format!(
                "{} is near its rate limit ({}/{} per minute, {}/{} per hour)",
                operation,
                usage.current_minute,
                usage.minute_limit,
                usage.current_hour,
                usage.hour_limit
            ));
        }
    }

    let score = 100u32.saturating_sub(penalty) as u8;
    HealthReport {
        score,
        status: HealthStatus::from_score(score),
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(minute: u64, minute_limit: u64) -> OperationUsage {
        OperationUsage {
            current_minute: minute,
            current_hour: minute,
            minute_limit,
            hour_limit: 1000,
        }
    }

    #[test]
    fn test_idle_queue_is_healthy() {
        let report = assess(&QueueStats::default(), &BTreeMap::new());
        assert_eq!(report.score, 100);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_failures_degrade() {
        let stats = QueueStats {
            completed: 80,
            failed: 20,
            ..Default::default()
        };
        let report = assess(&stats, &BTreeMap::new());
        assert_eq!(report.score, 70);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn test_everything_wrong_is_critical() {
        let stats = QueueStats {
            total_jobs: 5000,
            completed: 1,
            failed: 9,
            processing: 50,
            ..Default::default()
        };
        let usage = BTreeMap::from([
            (Operation::MlAnalysis, usage(5, 5)),
            (Operation::BatchProcessing, usage(2, 2)),
            (Operation::ChatRetrieval, usage(1, 100)),
        ]);

        let report = assess(&stats, &usage);
        assert_eq!(report.score, 10);
        assert_eq!(report.status, HealthStatus::Critical);
        assert_eq!(report.recommendations.len(), 5);
        assert!(report.recommendations[3].starts_with("ml_analysis"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
    }
}
