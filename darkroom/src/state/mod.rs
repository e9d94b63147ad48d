//! Application state
//!
//! Wires configuration, the record store, the blob store and the transform
//! into a ready-to-start pipeline and sweeper.

use crate::config::DarkroomConfig;
use crate::error::Result;
use crate::jobs::{JobPipeline, JobStore, PipelineRuntime, RetentionSweeper, SqliteJobStore};
use crate::storage::{BlobStore, LocalBlobStore, StorageError};
use crate::transform::{GrayscaleResize, TransformExecutor};
use std::sync::Arc;
use tracing::info;

/// Everything a darkroom process needs
///
/// # Example
///
/// ```rust,no_run
/// use darkroom::{config::DarkroomConfig, state::DarkroomState};
///
/// # async fn example() -> darkroom::Result<()> {
/// let config = DarkroomConfig::load()?;
/// let state = DarkroomState::from_config(config).await?;
/// let runtime = state.start();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DarkroomState {
    config: Arc<DarkroomConfig>,
    pipeline: JobPipeline,
    sweeper: RetentionSweeper,
}

impl DarkroomState {
    /// Open the configured SQLite database and blob directory
    ///
    /// The blob directory is created if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the blob
    /// directory cannot be created.
    pub async fn from_config(config: DarkroomConfig) -> Result<Self> {
        let store = SqliteJobStore::connect(
            &config.storage.database_url,
            config.storage.max_connections,
        )
        .await?;

        tokio::fs::create_dir_all(&config.storage.blob_dir)
            .await
            .map_err(StorageError::from)?;
        let blobs = LocalBlobStore::new(config.storage.blob_dir.clone())?;

        let executor = GrayscaleResize::new(config.transform.width, config.transform.height);

        info!(
            "Opened job store at {} and blob store at {}",
            config.storage.database_url,
            config.storage.blob_dir.display()
        );
        Ok(Self::with_components(
            config,
            Arc::new(store),
            Arc::new(blobs),
            Arc::new(executor),
        ))
    }

    /// Assemble state from explicit collaborators
    #[must_use]
    pub fn with_components(
        config: DarkroomConfig,
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        executor: Arc<dyn TransformExecutor>,
    ) -> Self {
        let sweeper = RetentionSweeper::new(
            Arc::clone(&store),
            Arc::clone(&blobs),
            &config.retention,
            &config.pipeline,
        );
        let pipeline = JobPipeline::new(store, blobs, executor, config.pipeline.clone());

        Self {
            config: Arc::new(config),
            pipeline,
            sweeper,
        }
    }

    /// Start workers, the watchdog and the retention sweeper
    #[must_use]
    pub fn start(&self) -> PipelineRuntime {
        let mut runtime = self.pipeline.start();
        let handle = self.sweeper.clone().spawn(runtime.token().clone());
        runtime.track(handle);
        runtime
    }

    /// Get configuration reference
    #[must_use]
    pub fn config(&self) -> &DarkroomConfig {
        &self.config
    }

    /// The job pipeline
    #[must_use]
    pub const fn pipeline(&self) -> &JobPipeline {
        &self.pipeline
    }

    /// The retention sweeper
    #[must_use]
    pub const fn sweeper(&self) -> &RetentionSweeper {
        &self.sweeper
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::MemoryJobStore;
    use crate::storage::MemoryBlobStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_from_config_creates_blob_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DarkroomConfig::default();
        config.storage.database_url = "sqlite::memory:".to_string();
        config.storage.blob_dir = dir.path().join("blobs");

        let state = DarkroomState::from_config(config).await.unwrap();

        assert!(dir.path().join("blobs").is_dir());
        assert_eq!(state.config().pipeline.worker_pool_size, 4);
    }

    #[tokio::test]
    async fn test_start_tracks_every_task() {
        let mut config = DarkroomConfig::default();
        config.pipeline.worker_pool_size = 2;
        let state = DarkroomState::with_components(
            config,
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(GrayscaleResize::default()),
        );

        let runtime = state.start();
        // Two workers, the watchdog and the sweeper
        assert_eq!(runtime.len(), 4);
        assert!(runtime.shutdown(Duration::from_secs(1)).await.is_graceful());
    }
}
