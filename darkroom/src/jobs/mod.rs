//! Asynchronous job pipeline
//!
//! Jobs move through a small state machine persisted in a [`JobStore`]:
//!
//! ```text
//! pending ──► processing ──► completed
//!    ▲            │
//!    └────────────┤ (watchdog re-dispatch)
//!                 ▼
//!               failed
//! ```
//!
//! - [`JobPipeline`] accepts submissions, answers status and result queries
//!   and runs a fixed pool of workers over a bounded queue
//! - the watchdog inside the pipeline re-dispatches jobs stalled in
//!   `processing` and fails them once the re-dispatch budget is spent
//! - [`RetentionSweeper`] reclaims records and blobs past the retention window
//!
//! Every state change is a [`Transition`]: a compare-and-set guarded by the
//! expected state and, for terminal edges, the claiming worker's
//! [`DispatchToken`]. A worker whose claim was superseded can therefore
//! never overwrite a newer outcome.
//!
//! # Example
//!
//! ```rust
//! use darkroom::config::PipelineSettings;
//! use darkroom::jobs::{JobPipeline, JobState, MemoryJobStore, OwnerId};
//! use darkroom::storage::MemoryBlobStore;
//! use darkroom::transform::{TransformError, TransformExecutor};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Identity;
//!
//! #[async_trait::async_trait]
//! impl TransformExecutor for Identity {
//!     async fn apply(&self, input: Vec<u8>) -> Result<Vec<u8>, TransformError> {
//!         Ok(input)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = JobPipeline::new(
//!         Arc::new(MemoryJobStore::new()),
//!         Arc::new(MemoryBlobStore::new()),
//!         Arc::new(Identity),
//!         PipelineSettings::default(),
//!     );
//!     let runtime = pipeline.start();
//!
//!     let id = pipeline.submit_bytes(OwnerId::from("alice"), None, b"pixels".to_vec()).await?;
//!     let job = pipeline
//!         .wait_for_terminal(id, Duration::from_millis(10), Duration::from_secs(5))
//!         .await?;
//!     assert_eq!(job.state, JobState::Completed);
//!     assert_eq!(pipeline.fetch_result(id).await?, b"pixels");
//!
//!     runtime.shutdown(Duration::from_secs(1)).await;
//!     Ok(())
//! }
//! ```

mod cancellation;
mod error;
mod job;
mod metrics;
mod pipeline;
mod queue;
mod retention;
mod state;
mod store;
mod transition;

pub use cancellation::{CancellationToken, ShutdownResult};
pub use error::{JobFailure, PipelineError, PipelineResult};
pub use job::{DispatchToken, Job, JobId, OwnerId};
pub use metrics::PipelineMetrics;
pub use pipeline::{JobPipeline, PipelineRuntime, WatchdogReport};
pub use retention::{RetentionSweeper, SweepReport};
pub use state::{JobState, ParseJobStateError};
pub use store::{JobStore, MemoryJobStore, SqliteJobStore, StoreError, StoreResult};
pub use transition::{Transition, TransitionError, TransitionFields};
