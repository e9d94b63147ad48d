//! Cooperative cancellation and shutdown outcomes for background tasks.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// A cancellation signal shared by the pipeline's background tasks.
///
/// Workers, the watchdog and the sweeper all hold a clone and stop at their
/// next await point once it fires.
///
/// # Examples
///
/// ```rust
/// use darkroom::jobs::CancellationToken;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let token = CancellationToken::new();
///
///     let worker = token.clone();
///     let handle = tokio::spawn(async move {
///         worker
///             .run_until_cancelled(tokio::time::sleep(Duration::from_secs(3600)))
///             .await
///     });
///
///     token.cancel();
///     assert!(handle.await.unwrap().is_none());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<CancellationState>,
}

#[derive(Debug)]
struct CancellationState {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    /// Create a token that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            state: Arc::new(CancellationState { tx, rx }),
        }
    }

    /// Check if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.state.rx.borrow()
    }

    /// Request cancellation of every clone.
    pub fn cancel(&self) {
        let _ = self.state.tx.send(true);
        debug!("cancellation requested");
    }

    /// Wait for the cancellation signal.
    ///
    /// Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender dropped, treat as cancelled
                break;
            }
        }
    }

    /// Drive `future` until it finishes or the token fires.
    ///
    /// Returns `None` if cancellation won.
    pub async fn run_until_cancelled<F>(&self, future: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            () = self.cancelled() => None,
            result = future => Some(result),
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of stopping the pipeline's background tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownResult {
    /// Every task stopped within the timeout.
    Graceful,
    /// Some tasks were still running at the deadline and were aborted.
    Forced {
        /// Number of tasks that had to be aborted.
        tasks_remaining: usize,
    },
}

impl ShutdownResult {
    /// Check if shutdown was graceful.
    #[must_use]
    pub const fn is_graceful(&self) -> bool {
        matches!(self, Self::Graceful)
    }

    /// Number of tasks that did not stop in time (0 if graceful).
    #[must_use]
    pub const fn tasks_remaining(&self) -> usize {
        match self {
            Self::Graceful => 0,
            Self::Forced { tasks_remaining } => *tasks_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.clone().cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_once_fired() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should observe cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_until_cancelled_passes_through_result() {
        let token = CancellationToken::new();
        assert_eq!(token.run_until_cancelled(async { 7 }).await, Some(7));

        token.cancel();
        assert_eq!(token.run_until_cancelled(async { 7 }).await, None);
    }

    #[test]
    fn test_shutdown_result() {
        assert!(ShutdownResult::Graceful.is_graceful());
        assert_eq!(ShutdownResult::Graceful.tasks_remaining(), 0);

        let forced = ShutdownResult::Forced { tasks_remaining: 2 };
        assert!(!forced.is_graceful());
        assert_eq!(forced.tasks_remaining(), 2);
    }
}
