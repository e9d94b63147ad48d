//! In-memory job record store.

use super::{JobStore, StoreError, StoreResult};
use crate::jobs::transition::Transition;
use crate::jobs::{Job, JobId, JobState, OwnerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Job records held in a lock-guarded map.
///
/// Every operation takes the lock once, so guards and writes are atomic.
/// Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    fn collect_sorted(&self, mut keep: impl FnMut(&Job) -> bool) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().values().filter(|job| keep(job)).cloned().collect();
        jobs.sort_by_key(|job| (job.created_at, job.id));
        jobs
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::DuplicateId(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> StoreResult<Job> {
        self.jobs.read().get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn transition(&self, id: JobId, transition: &Transition) -> StoreResult<Job> {
        let mut jobs = self.jobs.write();
        let current = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let next = current
            .apply(transition)
            .map_err(|err| StoreError::from_transition(id, err))?;
        *current = next.clone();
        Ok(next)
    }

    async fn list_by_owner(&self, owner_id: &OwnerId) -> StoreResult<Vec<Job>> {
        Ok(self.collect_sorted(|job| &job.owner_id == owner_id))
    }

    async fn list_by_state(&self, state: JobState) -> StoreResult<Vec<Job>> {
        Ok(self.collect_sorted(|job| job.state == state))
    }

    fn list_older_than(&self, cutoff: DateTime<Utc>) -> BoxStream<'_, StoreResult<JobId>> {
        // Snapshot under the lock so consumers may mutate while iterating
        let ids: Vec<_> = self
            .collect_sorted(|job| job.created_at <= cutoff)
            .into_iter()
            .map(|job| Ok(job.id))
            .collect();
        stream::iter(ids).boxed()
    }

    async fn delete(&self, id: JobId, expected_revision: u64) -> StoreResult<Job> {
        let mut jobs = self.jobs.write();
        let current = jobs.get(&id).ok_or(StoreError::NotFound(id))?;
        if current.revision != expected_revision {
            return Err(StoreError::StateConflict {
                id,
                reason: format!(
                    "expected revision {expected_revision}, found {}",
                    current.revision
                ),
            });
        }
        jobs.remove(&id).ok_or(StoreError::NotFound(id))
    }
}
