//! Worker loop: claim, transform, record the outcome.

use super::JobPipeline;
use crate::jobs::{CancellationToken, DispatchToken, Job, JobFailure, JobId, StoreError, Transition};
use crate::storage::BlobRef;
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What a worker did with one dequeued id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Processed {
    /// The job reached `completed`.
    Completed(BlobRef),
    /// The job reached `failed` with this cause.
    Failed(String),
    /// Another worker or the watchdog owns the job, or it no longer exists.
    Skipped,
    /// The claim succeeded but the terminal write did not land.
    Lost,
}

impl JobPipeline {
    pub(super) async fn run_worker(self, worker: usize, token: CancellationToken) {
        debug!("Worker {} started", worker);

        while let Some(Some(id)) = token.run_until_cancelled(self.queue.next()).await {
            match self.process(id).await {
                Processed::Completed(output_ref) => {
                    debug!("Worker {} wrote job {} to {}", worker, id, output_ref);
                }
                Processed::Failed(cause) => debug!("Worker {} failed job {}: {}", worker, id, cause),
                Processed::Skipped | Processed::Lost => {}
            }
        }

        debug!("Worker {} stopped", worker);
    }

    /// Claim `id` and run it to a terminal state.
    pub(crate) async fn process(&self, id: JobId) -> Processed {
        let token = DispatchToken::new();
        let job = match self.store.transition(id, &Transition::claim(token, Utc::now())).await {
            Ok(job) => job,
            Err(StoreError::StateConflict { reason, .. }) => {
                self.metrics.write().dispatch_conflicts += 1;
                debug!("Dropping duplicate dispatch of job {}: {}", id, reason);
                return Processed::Skipped;
            }
            Err(StoreError::NotFound(_)) => {
                debug!("Dropping dispatch of job {}: record no longer exists", id);
                return Processed::Skipped;
            }
            Err(err) => {
                // Left pending; the watchdog re-enqueues it later
                warn!("Failed to claim job {}: {}", id, err);
                return Processed::Skipped;
            }
        };

        {
            let mut metrics = self.metrics.write();
            metrics.jobs_claimed += 1;
            metrics.current_running += 1;
        }
        debug!("Job {} claimed with token {}", id, token);

        let outcome = self.execute(&job).await;
        let processed = self.finish(id, token, outcome).await;

        self.metrics.write().current_running -= 1;
        processed
    }

    async fn execute(&self, job: &Job) -> Result<BlobRef, JobFailure> {
        let input = self
            .blobs
            .get(&job.input_ref)
            .await
            .map_err(|e| JobFailure::InputUnavailable(e.to_string()))?;

        let limit = self.settings.executor_timeout();
        let started = Instant::now();
        let result = tokio::time::timeout(limit, self.executor.apply(input)).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.metrics.write().record_execution_time(elapsed_ms);

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(JobFailure::ExecutorError(err.to_string())),
            Err(_) => return Err(JobFailure::ExecutorTimeout(limit)),
        };

        self.blobs
            .put(output)
            .await
            .map_err(|e| JobFailure::OutputWriteFailed(e.to_string()))
    }

    async fn finish(
        &self,
        id: JobId,
        token: DispatchToken,
        outcome: Result<BlobRef, JobFailure>,
    ) -> Processed {
        let now = Utc::now();
        let (transition, output_ref) = match &outcome {
            Ok(output_ref) => (
                Transition::complete(token, output_ref.clone(), now),
                Some(output_ref.clone()),
            ),
            Err(failure) => (Transition::fail(token, failure.to_string(), now), None),
        };

        match self.store.transition(id, &transition).await {
            Ok(_) => match outcome {
                Ok(output_ref) => {
                    self.metrics.write().jobs_completed += 1;
                    info!("Job {} completed", id);
                    Processed::Completed(output_ref)
                }
                Err(failure) => {
                    self.metrics.write().jobs_failed += 1;
                    warn!("Job {} failed: {}", id, failure);
                    Processed::Failed(failure.to_string())
                }
            },
            Err(err) => {
                if err.is_conflict() {
                    self.metrics.write().dispatch_conflicts += 1;
                    debug!("Job {} was re-dispatched while running, discarding outcome", id);
                } else {
                    error!("Failed to record outcome of job {}: {}", id, err);
                }

                if let Some(orphan) = output_ref {
                    if let Err(cleanup) = self.blobs.delete(&orphan).await {
                        warn!("Failed to remove orphaned output {}: {}", orphan, cleanup);
                    }
                }
                Processed::Lost
            }
        }
    }
}
