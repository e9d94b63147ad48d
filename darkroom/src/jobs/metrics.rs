//! Pipeline counters.

use serde::{Deserialize, Serialize};

/// Snapshot of pipeline activity since start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Submissions accepted.
    pub jobs_submitted: u64,
    /// Submissions rejected because the queue was full.
    pub jobs_rejected: u64,
    /// Successful `pending -> processing` claims.
    pub jobs_claimed: u64,
    /// Jobs that reached `completed`.
    pub jobs_completed: u64,
    /// Jobs that reached `failed`, including watchdog give-ups.
    pub jobs_failed: u64,
    /// Watchdog `processing -> pending` re-dispatches.
    pub jobs_redispatched: u64,
    /// Pending jobs put back on the queue by recovery.
    pub jobs_requeued: u64,
    /// Claims or outcomes dropped because another actor won the race.
    pub dispatch_conflicts: u64,
    /// Ids waiting in the queue.
    pub current_queue_size: usize,
    /// Jobs currently held by a worker.
    pub current_running: usize,
    /// Number of executor runs timed.
    pub executions: u64,
    /// Total executor time in milliseconds.
    pub total_execution_time_ms: u64,
    /// Average executor time in milliseconds.
    pub avg_execution_time_ms: u64,
    /// Minimum executor time in milliseconds.
    pub min_execution_time_ms: u64,
    /// Maximum executor time in milliseconds.
    pub max_execution_time_ms: u64,
}

impl PipelineMetrics {
    /// Fold one executor run into the timing figures.
    pub const fn record_execution_time(&mut self, execution_time_ms: u64) {
        self.executions = self.executions.saturating_add(1);
        self.total_execution_time_ms = self.total_execution_time_ms.saturating_add(execution_time_ms);

        if self.min_execution_time_ms == 0 || execution_time_ms < self.min_execution_time_ms {
            self.min_execution_time_ms = execution_time_ms;
        }
        if execution_time_ms > self.max_execution_time_ms {
            self.max_execution_time_ms = execution_time_ms;
        }

        self.avg_execution_time_ms = self.total_execution_time_ms / self.executions;
    }

    /// Failed jobs as a percentage of finished jobs (0-100).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        let finished = self.jobs_completed + self.jobs_failed;
        if finished == 0 {
            0.0
        } else {
            (self.jobs_failed as f64 / finished as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_execution_time() {
        let mut metrics = PipelineMetrics::default();
        metrics.record_execution_time(30);
        metrics.record_execution_time(10);
        metrics.record_execution_time(20);

        assert_eq!(metrics.executions, 3);
        assert_eq!(metrics.min_execution_time_ms, 10);
        assert_eq!(metrics.max_execution_time_ms, 30);
        assert_eq!(metrics.avg_execution_time_ms, 20);
    }

    #[test]
    fn test_failure_rate() {
        let mut metrics = PipelineMetrics::default();
        assert!(metrics.failure_rate().abs() < f64::EPSILON);

        metrics.jobs_completed = 3;
        metrics.jobs_failed = 1;
        assert!((metrics.failure_rate() - 25.0).abs() < f64::EPSILON);
    }
}
