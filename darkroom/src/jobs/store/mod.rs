//! Job record store
//!
//! The store is the single source of truth for job state. Every mutation
//! goes through [`JobStore::transition`], a compare-and-set that is
//! linearizable per job id. Two adapters ship with the crate:
//! - [`MemoryJobStore`]: a lock-guarded map, for tests and ephemeral runs
//! - [`SqliteJobStore`]: durable records on `sqlx` with an embedded schema

mod memory;
mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use super::transition::{Transition, TransitionError};
use super::{Job, JobId, JobState, OwnerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a [`JobStore`].
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No record has this id.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// A record with this id already exists.
    #[error("job already exists: {0}")]
    DuplicateId(JobId),

    /// The record did not match the transition's guard; nothing was applied.
    #[error("state conflict on job {id}: {reason}")]
    StateConflict {
        /// Affected job.
        id: JobId,
        /// What the guard observed.
        reason: String,
    },

    /// The transition is outside the state machine or breaks a record invariant.
    #[error("invalid transition on job {id}: {reason}")]
    InvalidTransition {
        /// Affected job.
        id: JobId,
        /// Rejected edge or missing field.
        reason: String,
    },

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted row could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Map a rejected [`Job::apply`] onto the store taxonomy.
    #[must_use]
    pub fn from_transition(id: JobId, err: TransitionError) -> Self {
        match err {
            TransitionError::StateConflict(reason) => Self::StateConflict { id, reason },
            other => Self::InvalidTransition {
                id,
                reason: other.to_string(),
            },
        }
    }

    /// Whether a racing caller changed the record first.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::StateConflict { .. })
    }
}

/// Durable table of job records.
///
/// Implementations must be safe under concurrent callers and must apply
/// [`transition`](Self::transition) and [`delete`](Self::delete)
/// atomically: either the guard holds and the change is applied, or
/// nothing changes.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateId`] if the id is taken.
    async fn create(&self, job: &Job) -> StoreResult<()>;

    /// Read a record.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no record has this id.
    async fn get(&self, id: JobId) -> StoreResult<Job>;

    /// Conditionally transition a record and return the updated record.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no record has this id
    /// - [`StoreError::StateConflict`] if the state or token guard fails
    /// - [`StoreError::InvalidTransition`] if the edge or fields are invalid
    async fn transition(&self, id: JobId, transition: &Transition) -> StoreResult<Job>;

    /// All records of one owner, oldest first.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    async fn list_by_owner(&self, owner_id: &OwnerId) -> StoreResult<Vec<Job>>;

    /// All records in one state, oldest first.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the backend fails.
    async fn list_by_state(&self, state: JobState) -> StoreResult<Vec<Job>>;

    /// Ids of records created at or before `cutoff`.
    ///
    /// The stream is lazy and finite and is meant to be consumed once.
    fn list_older_than(&self, cutoff: DateTime<Utc>) -> BoxStream<'_, StoreResult<JobId>>;

    /// Remove a record iff its revision still equals `expected_revision`.
    ///
    /// Returns the removed record.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no record has this id
    /// - [`StoreError::StateConflict`] if the record changed since it was read
    async fn delete(&self, id: JobId, expected_revision: u64) -> StoreResult<Job>;
}
