//! Watchdog: re-dispatch stalled jobs and re-enqueue orphaned submissions.
//!
//! A job is stalled when it has sat in `processing` longer than the
//! processing timeout, measured from its persisted `updated_at`. Each stall
//! sends it back to `pending` with the stale dispatch token as guard, up to
//! `max_redispatches` times; after that it is failed with
//! `MaxRetriesExceeded`.

use super::JobPipeline;
use crate::jobs::queue::Enqueue;
use crate::jobs::{CancellationToken, JobFailure, JobState, PipelineResult, StoreError, Transition};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// What one watchdog pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchdogReport {
    /// Stalled jobs sent back to `pending`.
    pub redispatched: usize,
    /// Stalled jobs failed with `MaxRetriesExceeded`.
    pub abandoned: usize,
    /// Idle pending jobs put back on the queue.
    pub requeued: usize,
    /// Transitions that lost a race to a worker.
    pub conflicts: usize,
}

impl WatchdogReport {
    /// Whether the pass changed anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.redispatched == 0 && self.abandoned == 0 && self.requeued == 0
    }
}

impl JobPipeline {
    /// Enqueue every pending job in the store.
    ///
    /// Stops early if the queue fills up; the watchdog picks up the rest.
    ///
    /// # Errors
    ///
    /// [`PipelineError::StoreUnavailable`](crate::jobs::PipelineError::StoreUnavailable)
    /// if the store cannot be listed.
    pub async fn recover_pending(&self) -> PipelineResult<usize> {
        let mut recovered = 0;

        for job in self.store.list_by_state(JobState::Pending).await? {
            match self.queue.try_enqueue(job.id) {
                Enqueue::Queued => recovered += 1,
                Enqueue::AlreadyQueued => {}
                Enqueue::Full => {
                    warn!("Work queue full during recovery, leaving remaining jobs to the watchdog");
                    break;
                }
            }
        }

        if recovered > 0 {
            self.metrics.write().jobs_requeued += recovered as u64;
            info!("Recovered {} pending jobs", recovered);
        }
        Ok(recovered)
    }

    /// Run one watchdog pass as of `now`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::StoreUnavailable`](crate::jobs::PipelineError::StoreUnavailable)
    /// if the store cannot be listed or updated.
    pub async fn watchdog_pass(&self, now: DateTime<Utc>) -> PipelineResult<WatchdogReport> {
        let timeout = self.settings.processing_timeout();
        let max_redispatches = self.settings.max_redispatches;
        let mut report = WatchdogReport::default();

        for job in self.store.list_by_state(JobState::Processing).await? {
            if !job.idle_longer_than(now, timeout) {
                continue;
            }
            let Some(stale) = job.dispatch_token else {
                error!("Job {} is processing without a dispatch token", job.id);
                continue;
            };

            let (transition, redispatch) = if job.redispatch_count < max_redispatches {
                (Transition::redispatch(stale, job.redispatch_count + 1, now), true)
            } else {
                let cause = JobFailure::MaxRetriesExceeded(job.redispatch_count);
                (Transition::fail(stale, cause.to_string(), now), false)
            };

            match self.store.transition(job.id, &transition).await {
                Ok(updated) if redispatch => {
                    report.redispatched += 1;
                    self.metrics.write().jobs_redispatched += 1;
                    warn!(
                        "Job {} stalled in processing, re-dispatching (attempt {} of {})",
                        job.id, updated.redispatch_count, max_redispatches
                    );
                    if self.queue.try_enqueue(job.id) == Enqueue::Full {
                        debug!("Work queue full, job {} stays pending until the next pass", job.id);
                    }
                }
                Ok(_) => {
                    report.abandoned += 1;
                    self.metrics.write().jobs_failed += 1;
                    warn!(
                        "Job {} failed after {} re-dispatches",
                        job.id, job.redispatch_count
                    );
                }
                Err(StoreError::StateConflict { .. } | StoreError::NotFound(_)) => {
                    report.conflicts += 1;
                    debug!("Job {} finished before the watchdog could act", job.id);
                }
                Err(err) => return Err(err.into()),
            }
        }

        for job in self.store.list_by_state(JobState::Pending).await? {
            if job.idle_longer_than(now, timeout) && self.queue.try_enqueue(job.id) == Enqueue::Queued {
                report.requeued += 1;
                debug!("Re-enqueued idle pending job {}", job.id);
            }
        }

        if report.requeued > 0 {
            self.metrics.write().jobs_requeued += report.requeued as u64;
        }
        Ok(report)
    }

    pub(super) async fn run_watchdog(self, token: CancellationToken) {
        if let Err(err) = self.recover_pending().await {
            error!("Pending job recovery failed: {}", err);
        }

        let mut ticker = tokio::time::interval(self.settings.watchdog_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        while token.run_until_cancelled(ticker.tick()).await.is_some() {
            match self.watchdog_pass(Utc::now()).await {
                Ok(report) if !report.is_empty() => info!(
                    "Watchdog pass: {} re-dispatched, {} abandoned, {} re-enqueued",
                    report.redispatched, report.abandoned, report.requeued
                ),
                Ok(_) => {}
                Err(err) => error!("Watchdog pass failed: {}", err),
            }
        }

        debug!("Watchdog stopped");
    }
}
