//! Test doubles shared by the unit tests

use crate::config::PipelineSettings;
use crate::jobs::{Job, JobId, JobState, JobStore, OwnerId, StoreError, StoreResult, Transition};
use crate::transform::{TransformError, TransformExecutor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Pipeline settings with short timeouts and a small re-dispatch budget
pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        worker_pool_size: 2,
        queue_capacity: 8,
        processing_timeout_ms: 1_000,
        executor_timeout_ms: 500,
        max_redispatches: 2,
        watchdog_interval_ms: 100,
        submit_wait_ms: 0,
    }
}

/// Record store whose every call fails as if the database were down
#[derive(Debug, Clone, Copy)]
pub struct UnavailableStore;

fn down() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl JobStore for UnavailableStore {
    async fn create(&self, _job: &Job) -> StoreResult<()> {
        Err(down())
    }

    async fn get(&self, _id: JobId) -> StoreResult<Job> {
        Err(down())
    }

    async fn transition(&self, _id: JobId, _transition: &Transition) -> StoreResult<Job> {
        Err(down())
    }

    async fn list_by_owner(&self, _owner_id: &OwnerId) -> StoreResult<Vec<Job>> {
        Err(down())
    }

    async fn list_by_state(&self, _state: JobState) -> StoreResult<Vec<Job>> {
        Err(down())
    }

    fn list_older_than(&self, _cutoff: DateTime<Utc>) -> BoxStream<'_, StoreResult<JobId>> {
        stream::iter([Err(down())]).boxed()
    }

    async fn delete(&self, _id: JobId, _expected_revision: u64) -> StoreResult<Job> {
        Err(down())
    }
}

/// Executor backed by a plain function
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F> TransformExecutor for FnExecutor<F>
where
    F: Fn(Vec<u8>) -> Result<Vec<u8>, TransformError> + Send + Sync,
{
    async fn apply(&self, input: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        (self.0)(input)
    }
}

/// Executor that waits for a permit before echoing its input
///
/// Lets a test observe a job while it is `processing`.
#[derive(Debug, Clone)]
pub struct GatedExecutor {
    gate: Arc<Semaphore>,
    calls: Arc<AtomicUsize>,
}

impl Default for GatedExecutor {
    fn default() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            calls: Arc::default(),
        }
    }
}

impl GatedExecutor {
    /// Let `n` executions through
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Number of executions started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransformExecutor for GatedExecutor {
    async fn apply(&self, input: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| TransformError::Failed(e.to_string()))?;
        permit.forget();
        Ok(input)
    }
}

/// Executor that never returns
#[derive(Debug, Clone, Copy)]
pub struct StallingExecutor;

#[async_trait]
impl TransformExecutor for StallingExecutor {
    async fn apply(&self, _input: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_gated_executor_starts_closed() {
        let executor = GatedExecutor::default();
        let pending = tokio::time::timeout(Duration::from_millis(20), executor.apply(b"x".to_vec())).await;
        assert!(pending.is_err());
        assert_eq!(executor.calls(), 1);

        executor.open(1);
        assert_eq!(executor.apply(b"y".to_vec()).await.unwrap(), b"y");
        assert_eq!(executor.calls(), 2);
    }
}
