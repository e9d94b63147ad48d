//! Bounded work queue between submission and the worker pool.

use super::JobId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, OwnedPermit};

/// Result of a best-effort enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueue {
    /// The id was added to the queue.
    Queued,
    /// The id is already waiting in the queue.
    AlreadyQueued,
    /// The queue has no free slot.
    Full,
}

/// A reserved queue slot.
///
/// Dropping it without [`send`](Self::send) releases the slot.
#[derive(Debug)]
pub(crate) struct Reservation {
    permit: OwnedPermit<JobId>,
    queued: Arc<Mutex<HashSet<JobId>>>,
}

impl Reservation {
    /// Place `id` in the reserved slot.
    pub(crate) fn send(self, id: JobId) {
        self.queued.lock().insert(id);
        self.permit.send(id);
    }
}

/// Multi-consumer bounded queue of job ids.
///
/// A capacity of zero has no channel at all, so every reservation fails.
/// Ids waiting in the channel are tracked in a set so that recovery paths
/// never enqueue the same job twice.
#[derive(Debug, Clone)]
pub(crate) struct WorkQueue {
    sender: Option<mpsc::Sender<JobId>>,
    receiver: Option<Arc<tokio::sync::Mutex<mpsc::Receiver<JobId>>>>,
    queued: Arc<Mutex<HashSet<JobId>>>,
    capacity: usize,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` ids.
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = if capacity == 0 {
            (None, None)
        } else {
            let (tx, rx) = mpsc::channel(capacity);
            (Some(tx), Some(Arc::new(tokio::sync::Mutex::new(rx))))
        };

        Self {
            sender,
            receiver,
            queued: Arc::new(Mutex::new(HashSet::new())),
            capacity,
        }
    }

    /// Configured capacity.
    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of ids waiting.
    pub(crate) fn len(&self) -> usize {
        self.sender
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    /// Whether `id` is waiting in the queue.
    #[cfg(test)]
    pub(crate) fn contains(&self, id: &JobId) -> bool {
        self.queued.lock().contains(id)
    }

    /// Reserve a slot, waiting at most `wait` for one to free up.
    ///
    /// Returns `None` if the queue stayed full.
    pub(crate) async fn reserve(&self, wait: Duration) -> Option<Reservation> {
        let sender = self.sender.clone()?;

        let permit = if wait.is_zero() {
            sender.try_reserve_owned().ok()?
        } else {
            tokio::time::timeout(wait, sender.reserve_owned())
                .await
                .ok()?
                .ok()?
        };

        Some(Reservation {
            permit,
            queued: Arc::clone(&self.queued),
        })
    }

    /// Enqueue `id` without waiting, skipping it if already queued.
    pub(crate) fn try_enqueue(&self, id: JobId) -> Enqueue {
        let Some(sender) = self.sender.clone() else {
            return Enqueue::Full;
        };

        let mut queued = self.queued.lock();
        if queued.contains(&id) {
            return Enqueue::AlreadyQueued;
        }

        match sender.try_reserve_owned() {
            Ok(permit) => {
                queued.insert(id);
                permit.send(id);
                Enqueue::Queued
            }
            Err(_) => Enqueue::Full,
        }
    }

    /// Take the next id, waiting until one is available.
    ///
    /// Returns `None` once the queue can never yield another id.
    pub(crate) async fn next(&self) -> Option<JobId> {
        let receiver = self.receiver.as_ref()?;
        let id = receiver.lock().await.recv().await?;
        self.queued.lock().remove(&id);
        Some(id)
    }
}
