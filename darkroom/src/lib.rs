//! darkroom: asynchronous image transformation jobs
//!
//! Users submit an image, a fixed pool of workers transforms it in the
//! background, and the result is fetched later by job id. The crate owns the
//! parts that make that reliable:
//!
//! - a persisted job lifecycle (`pending -> processing -> completed | failed`)
//!   where every change is a compare-and-set
//! - a bounded work queue that rejects submissions instead of growing
//! - a watchdog that re-dispatches jobs whose worker disappeared, a bounded
//!   number of times
//! - a retention sweeper that reclaims old jobs and their blobs
//!
//! Storage, records and the transform itself sit behind traits
//! ([`BlobStore`](storage::BlobStore), [`JobStore`](jobs::JobStore),
//! [`TransformExecutor`](transform::TransformExecutor)) with local
//! filesystem, SQLite and `image`-crate implementations included.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use darkroom::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> darkroom::Result<()> {
//!     darkroom::observability::init()?;
//!
//!     let state = DarkroomState::from_config(DarkroomConfig::load()?).await?;
//!     let runtime = state.start();
//!
//!     let bytes = std::fs::read("photo.png").map_err(darkroom::storage::StorageError::from)?;
//!     let id = state.pipeline().submit_bytes(OwnerId::from("alice"), None, bytes).await?;
//!     let job = state
//!         .pipeline()
//!         .wait_for_terminal(id, Duration::from_millis(100), Duration::from_secs(60))
//!         .await?;
//!     println!("job {id} finished as {}", job.state);
//!
//!     runtime.shutdown(Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```

// Lint configuration is handled at the workspace level in Cargo.toml

pub mod config;
pub mod error;
pub mod jobs;
pub mod observability;
pub mod state;
pub mod storage;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{DarkroomError, Result};

pub mod prelude {
    //! Convenience re-exports for common types and traits
    //!
    //! # Examples
    //!
    //! ```rust
    //! use darkroom::prelude::*;
    //! ```

    pub use crate::config::DarkroomConfig;
    pub use crate::error::DarkroomError;
    pub use crate::jobs::{
        Job, JobId, JobPipeline, JobState, JobStore, OwnerId, PipelineError, PipelineRuntime,
        RetentionSweeper,
    };
    pub use crate::state::DarkroomState;
    pub use crate::storage::{BlobRef, BlobStore};
    pub use crate::transform::TransformExecutor;
}
