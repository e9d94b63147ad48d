//! Job-related error types.

use super::{JobId, JobState};
use super::store::StoreError;
use crate::storage::{BlobRef, StorageError};
use std::time::Duration;
use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Causes recorded in a failed job's `error` field.
///
/// These never reach the submitter as errors; they are written into the
/// record and surface through `GetResult` as [`PipelineError::JobFailed`].
#[derive(Debug, Clone, Error)]
pub enum JobFailure {
    /// The executor did not return within the executor timeout.
    #[error("ExecutorTimeout: transform did not finish within {0:?}")]
    ExecutorTimeout(Duration),

    /// The executor reported an error.
    #[error("ExecutorError: {0}")]
    ExecutorError(String),

    /// The watchdog gave up after re-dispatching the job.
    #[error("MaxRetriesExceeded: job stalled in processing after {0} re-dispatches")]
    MaxRetriesExceeded(u32),

    /// The input blob could not be read.
    #[error("InputUnavailable: {0}")]
    InputUnavailable(String),

    /// The output blob could not be written.
    #[error("OutputWriteFailed: {0}")]
    OutputWriteFailed(String),
}

/// Errors returned by the pipeline's public operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No job has this id.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// A conditional transition lost a race.
    #[error("state conflict on job {id}: {reason}")]
    StateConflict {
        /// Affected job.
        id: JobId,
        /// What the store observed.
        reason: String,
    },

    /// The job has not reached a terminal state yet.
    #[error("job {id} is not ready (state: {state})")]
    NotReady {
        /// Affected job.
        id: JobId,
        /// Current state.
        state: JobState,
    },

    /// The job failed; `error` is the recorded cause.
    #[error("job {id} failed: {error}")]
    JobFailed {
        /// Affected job.
        id: JobId,
        /// Recorded failure cause.
        error: String,
    },

    /// The job completed but its output blob no longer exists.
    #[error("result {output_ref} of job {id} is missing")]
    ResultMissing {
        /// Affected job.
        id: JobId,
        /// Recorded output location.
        output_ref: BlobRef,
    },

    /// The work queue is full.
    #[error("job queue is full (capacity: {capacity})")]
    Overloaded {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The record store could not be reached.
    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),

    /// Waiting for a terminal state took longer than the deadline.
    #[error("job {id} did not finish within {waited:?}")]
    WaitTimeout {
        /// Affected job.
        id: JobId,
        /// How long the caller waited.
        waited: Duration,
    },

    /// Blob storage failed outside of a job's own processing.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The store returned something the pipeline cannot use.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::StateConflict { id, reason } => Self::StateConflict { id, reason },
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
            other @ (StoreError::DuplicateId(_)
            | StoreError::InvalidTransition { .. }
            | StoreError::Corrupt(_)) => Self::Internal(other.to_string()),
        }
    }
}
