//! The job pipeline: submission, status queries and the worker pool.
//!
//! [`JobPipeline`] is a cheap-to-clone handle. Every clone shares the same
//! record store, blob store, executor, work queue and counters. Nothing here
//! calls the executor inline: [`submit`](JobPipeline::submit) records a
//! pending job and enqueues its id, and the workers started by
//! [`start`](JobPipeline::start) do the rest.

mod runtime;
mod watchdog;
mod worker;

#[cfg(test)]
mod tests;

pub use runtime::PipelineRuntime;
pub use watchdog::WatchdogReport;

use super::metrics::PipelineMetrics;
use super::queue::WorkQueue;
use super::store::JobStore;
use super::{CancellationToken, Job, JobId, OwnerId, PipelineError, PipelineResult};
use crate::config::PipelineSettings;
use crate::storage::{BlobRef, BlobStore, StorageError};
use crate::transform::TransformExecutor;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handle to the asynchronous job pipeline.
#[derive(Clone)]
pub struct JobPipeline {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    executor: Arc<dyn TransformExecutor>,
    queue: WorkQueue,
    settings: Arc<PipelineSettings>,
    metrics: Arc<RwLock<PipelineMetrics>>,
}

impl std::fmt::Debug for JobPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPipeline")
            .field("queue_capacity", &self.queue.capacity())
            .field("queued", &self.queue.len())
            .field("settings", &self.settings)
            .field("metrics", &self.metrics.read())
            .finish_non_exhaustive()
    }
}

impl JobPipeline {
    /// Create a pipeline over the given collaborators.
    ///
    /// No background task runs until [`start`](Self::start) is called.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        executor: Arc<dyn TransformExecutor>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            blobs,
            executor,
            queue: WorkQueue::new(settings.queue_capacity),
            settings: Arc::new(settings),
            metrics: Arc::new(RwLock::new(PipelineMetrics::default())),
        }
    }

    /// Pipeline settings.
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Record store shared with the pipeline.
    #[must_use]
    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    /// Blob store shared with the pipeline.
    #[must_use]
    pub fn blobs(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.blobs)
    }

    /// Spawn the worker pool and the watchdog.
    ///
    /// The watchdog first enqueues every pending job found in the store, so
    /// submissions that never reached a worker before a restart are picked up.
    #[must_use]
    pub fn start(&self) -> PipelineRuntime {
        let mut runtime = PipelineRuntime::new(CancellationToken::new());

        for worker in 0..self.settings.worker_pool_size {
            let pipeline = self.clone();
            let token = runtime.token().clone();
            runtime.track(tokio::spawn(pipeline.run_worker(worker, token)));
        }

        let pipeline = self.clone();
        let token = runtime.token().clone();
        runtime.track(tokio::spawn(pipeline.run_watchdog(token)));

        info!(
            "Job pipeline started with {} workers (queue capacity {})",
            self.settings.worker_pool_size,
            self.queue.capacity()
        );
        runtime
    }

    /// Submit a job for an artifact already in the blob store.
    ///
    /// Queue space is reserved before the record is created, so a rejected
    /// submission leaves no record behind.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Overloaded`] if the queue stays full for the
    ///   configured submit wait
    /// - [`PipelineError::StoreUnavailable`] if the record cannot be persisted
    pub async fn submit(&self, owner_id: OwnerId, input_ref: BlobRef) -> PipelineResult<JobId> {
        self.enqueue(Job::new(owner_id, input_ref, Utc::now())).await
    }

    async fn enqueue(&self, job: Job) -> PipelineResult<JobId> {
        let Some(slot) = self.queue.reserve(self.settings.submit_wait()).await else {
            self.metrics.write().jobs_rejected += 1;
            warn!(
                "Rejecting submission from {}: work queue is full (capacity {})",
                job.owner_id,
                self.queue.capacity()
            );
            return Err(PipelineError::Overloaded {
                capacity: self.queue.capacity(),
            });
        };

        self.store.create(&job).await?;
        slot.send(job.id);

        self.metrics.write().jobs_submitted += 1;
        info!("Job {} submitted by {}", job.id, job.owner_id);
        Ok(job.id)
    }

    /// Store `bytes` as a new input artifact and submit a job for it.
    ///
    /// `source_name` is the name the upload arrived under; it is kept on the
    /// record so listings can be matched back to their files. If the
    /// submission fails the uploaded blob is deleted again.
    ///
    /// # Errors
    ///
    /// Any error from [`submit`](Self::submit), or
    /// [`PipelineError::Storage`] if the upload cannot be written.
    pub async fn submit_bytes(
        &self,
        owner_id: OwnerId,
        source_name: Option<String>,
        bytes: Vec<u8>,
    ) -> PipelineResult<JobId> {
        let input_ref = self.blobs.put(bytes).await?;

        let mut job = Job::new(owner_id, input_ref.clone(), Utc::now());
        job.source_name = source_name;

        match self.enqueue(job).await {
            Ok(id) => Ok(id),
            Err(err) => {
                if let Err(cleanup) = self.blobs.delete(&input_ref).await {
                    warn!("Failed to remove upload {} after rejected submission: {}", input_ref, cleanup);
                }
                Err(err)
            }
        }
    }

    /// Read a job's current record.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NotFound`] if the id is unknown
    /// - [`PipelineError::StoreUnavailable`] if the store cannot be reached
    pub async fn get_status(&self, id: JobId) -> PipelineResult<Job> {
        Ok(self.store.get(id).await?)
    }

    /// Location of a completed job's output.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NotReady`] while pending or processing
    /// - [`PipelineError::JobFailed`] if the job failed
    /// - [`PipelineError::ResultMissing`] if the output blob is gone
    /// - [`PipelineError::NotFound`] / [`PipelineError::StoreUnavailable`]
    ///   as for [`get_status`](Self::get_status)
    pub async fn get_result(&self, id: JobId) -> PipelineResult<BlobRef> {
        let job = self.get_status(id).await?;

        if !job.state.is_terminal() {
            return Err(PipelineError::NotReady { id, state: job.state });
        }

        if let Some(error) = job.error {
            return Err(PipelineError::JobFailed { id, error });
        }

        let output_ref = job
            .output_ref
            .ok_or_else(|| PipelineError::Internal(format!("completed job {id} has no output")))?;

        if self.blobs.exists(&output_ref).await? {
            Ok(output_ref)
        } else {
            Err(PipelineError::ResultMissing { id, output_ref })
        }
    }

    /// Bytes of a completed job's output.
    ///
    /// # Errors
    ///
    /// As for [`get_result`](Self::get_result); a blob that vanishes
    /// between the check and the read is also [`PipelineError::ResultMissing`].
    pub async fn fetch_result(&self, id: JobId) -> PipelineResult<Vec<u8>> {
        let output_ref = self.get_result(id).await?;

        match self.blobs.get(&output_ref).await {
            Ok(bytes) => Ok(bytes),
            Err(StorageError::NotFound(output_ref)) => {
                Err(PipelineError::ResultMissing { id, output_ref })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// All jobs of one owner, oldest first.
    ///
    /// # Errors
    ///
    /// [`PipelineError::StoreUnavailable`] if the store cannot be reached.
    pub async fn list_jobs(&self, owner_id: &OwnerId) -> PipelineResult<Vec<Job>> {
        Ok(self.store.list_by_owner(owner_id).await?)
    }

    /// Poll [`get_status`](Self::get_status) until the job is terminal.
    ///
    /// # Errors
    ///
    /// [`PipelineError::WaitTimeout`] if `deadline` passes first, or any
    /// error from [`get_status`](Self::get_status).
    pub async fn wait_for_terminal(
        &self,
        id: JobId,
        poll: Duration,
        deadline: Duration,
    ) -> PipelineResult<Job> {
        let started = tokio::time::Instant::now();

        loop {
            let job = self.get_status(id).await?;
            if job.state.is_terminal() {
                return Ok(job);
            }

            let waited = started.elapsed();
            if waited >= deadline {
                debug!("Gave up waiting for job {} after {:?}", id, waited);
                return Err(PipelineError::WaitTimeout { id, waited });
            }

            tokio::time::sleep(poll.min(deadline - waited)).await;
        }
    }

    /// Snapshot of the pipeline counters.
    #[must_use]
    pub fn metrics(&self) -> PipelineMetrics {
        let mut metrics = self.metrics.read().clone();
        metrics.current_queue_size = self.queue.len();
        metrics
    }
}
