//! Handle over the pipeline's background tasks.

use crate::jobs::{CancellationToken, ShutdownResult};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Background tasks spawned for a running pipeline.
///
/// Dropping the runtime leaves the tasks running; call
/// [`shutdown`](Self::shutdown) to stop them.
#[derive(Debug)]
pub struct PipelineRuntime {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl PipelineRuntime {
    pub(super) const fn new(token: CancellationToken) -> Self {
        Self {
            token,
            handles: Vec::new(),
        }
    }

    /// Token every tracked task stops on.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Track another task so that shutdown waits for it.
    ///
    /// The task should stop once [`token`](Self::token) fires.
    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no task is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every task and wait up to `timeout` for them to stop.
    ///
    /// Tasks still running at the deadline are aborted.
    pub async fn shutdown(self, timeout: Duration) -> ShutdownResult {
        info!("Shutting down pipeline ({} tasks)", self.handles.len());
        self.token.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut tasks_remaining = 0;

        for mut handle in self.handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                tasks_remaining += 1;
            }
        }

        if tasks_remaining == 0 {
            info!("Pipeline shutdown completed gracefully");
            ShutdownResult::Graceful
        } else {
            warn!("Pipeline forced shutdown: {} tasks aborted", tasks_remaining);
            ShutdownResult::Forced { tasks_remaining }
        }
    }
}
