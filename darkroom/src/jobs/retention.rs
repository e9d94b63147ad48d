//! Retention sweeper: reclaims jobs older than the retention window.
//!
//! Each expired record is re-read and removed with a revision-guarded
//! delete, so the state and age check and the removal are one atomic step
//! against the store. Blobs are only touched after that delete succeeds,
//! which means two overlapping sweeps never delete the same blob twice.

use super::store::{JobStore, StoreError};
use super::{CancellationToken, Job, JobId, JobState, PipelineError, PipelineResult};
use crate::config::{PipelineSettings, RetentionSettings};
use crate::storage::{BlobRef, BlobStore};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records at or past the retention window.
    pub expired: usize,
    /// Records removed.
    pub deleted: usize,
    /// Expired records kept because they are still being worked on or
    /// changed while the sweep ran.
    pub retained: usize,
    /// Blobs removed.
    pub blobs_deleted: usize,
    /// Blobs that were already gone.
    pub blob_misses: usize,
    /// Blobs that could not be removed.
    pub blob_errors: usize,
}

/// Periodic reclaimer of expired jobs and their blobs.
#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    retention_window: Duration,
    sweep_interval: Duration,
    processing_timeout: Duration,
    max_redispatches: u32,
}

impl std::fmt::Debug for RetentionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionSweeper")
            .field("retention_window", &self.retention_window)
            .field("sweep_interval", &self.sweep_interval)
            .field("processing_timeout", &self.processing_timeout)
            .field("max_redispatches", &self.max_redispatches)
            .finish_non_exhaustive()
    }
}

impl RetentionSweeper {
    /// Create a sweeper over the pipeline's stores.
    ///
    /// The pipeline settings decide when a `processing` job counts as
    /// abandoned and may be reclaimed.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        retention: &RetentionSettings,
        pipeline: &PipelineSettings,
    ) -> Self {
        Self {
            store,
            blobs,
            retention_window: retention.retention_window(),
            sweep_interval: retention.sweep_interval(),
            processing_timeout: pipeline.processing_timeout(),
            max_redispatches: pipeline.max_redispatches,
        }
    }

    /// Run one sweep as of `now`.
    ///
    /// A job is expired when `now - created_at >= retention_window`.
    /// Re-running a sweep is harmless: already removed jobs simply no longer
    /// show up.
    ///
    /// # Errors
    ///
    /// [`PipelineError::StoreUnavailable`] if the store fails mid-sweep; jobs
    /// handled before the failure stay handled.
    pub async fn sweep(&self, now: DateTime<Utc>) -> PipelineResult<SweepReport> {
        let window = chrono::Duration::from_std(self.retention_window)
            .map_err(|e| PipelineError::Internal(format!("retention window out of range: {e}")))?;
        // A window reaching past the earliest representable instant expires nothing
        let Some(cutoff) = now.checked_sub_signed(window) else {
            debug!("Retention window {:?} predates every job, nothing to sweep", self.retention_window);
            return Ok(SweepReport::default());
        };

        // Collect first: the listing may hold a store connection
        let ids: Vec<JobId> = self.store.list_older_than(cutoff).try_collect().await?;
        let mut report = SweepReport {
            expired: ids.len(),
            ..SweepReport::default()
        };

        for id in ids {
            let job = match self.store.get(id).await {
                Ok(job) => job,
                Err(StoreError::NotFound(_)) => continue,
                Err(err) => return Err(err.into()),
            };

            if !self.reclaimable(&job, now) {
                report.retained += 1;
                debug!("Retaining expired job {} in state {}", id, job.state);
                continue;
            }

            let removed = match self.store.delete(id, job.revision).await {
                Ok(removed) => removed,
                Err(StoreError::NotFound(_)) => continue,
                Err(StoreError::StateConflict { .. }) => {
                    report.retained += 1;
                    debug!("Job {} changed during sweep, retrying next time", id);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            report.deleted += 1;

            for blob in std::iter::once(&removed.input_ref).chain(removed.output_ref.as_ref()) {
                self.delete_blob(id, blob, &mut report).await;
            }
        }

        Ok(report)
    }

    /// Spawn the periodic sweep loop.
    #[must_use]
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while token.run_until_cancelled(ticker.tick()).await.is_some() {
                match self.sweep(Utc::now()).await {
                    Ok(report) => info!(
                        "Retention sweep: {} expired, {} deleted, {} retained, {} blob misses",
                        report.expired, report.deleted, report.retained, report.blob_misses
                    ),
                    Err(err) => error!("Retention sweep failed: {}", err),
                }
            }

            debug!("Retention sweeper stopped");
        })
    }

    fn reclaimable(&self, job: &Job, now: DateTime<Utc>) -> bool {
        job.state != JobState::Processing
            || (job.idle_longer_than(now, self.processing_timeout)
                && job.redispatch_count >= self.max_redispatches)
    }

    async fn delete_blob(&self, id: JobId, blob: &BlobRef, report: &mut SweepReport) {
        match self.blobs.delete(blob).await {
            Ok(()) => report.blobs_deleted += 1,
            Err(err) if err.is_not_found() => {
                report.blob_misses += 1;
                debug!("Blob {} of job {} was already gone", blob, id);
            }
            Err(err) => {
                report.blob_errors += 1;
                warn!("Failed to delete blob {} of job {}: {}", blob, id, err);
            }
        }
    }
}
