//! Blob storage trait definitions

use super::types::{BlobRef, StorageResult};
use async_trait::async_trait;

/// Abstraction for artifact storage backends
///
/// Originals and transformed outputs are both stored here. Every blob is
/// written once and is immutable afterwards; the only other mutation is
/// deletion by the retention sweeper.
///
/// # Implementation Requirements
///
/// Implementations must:
/// - Generate a unique reference for each stored blob
/// - Handle concurrent access safely
/// - Never expose a partially written blob to [`get`](Self::get)
///
/// # Examples
///
/// ```rust,no_run
/// use darkroom::storage::{BlobStore, LocalBlobStore};
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// let store = LocalBlobStore::new(PathBuf::from("/var/lib/darkroom/blobs"))?;
///
/// let blob = store.put(vec![0xFF, 0xD8, 0xFF]).await?;
/// let data = store.get(&blob).await?;
/// assert_eq!(data.len(), 3);
///
/// store.delete(&blob).await?;
/// # Ok(())
/// # }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores bytes and returns the reference to read them back
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable or I/O fails.
    async fn put(&self, data: Vec<u8>) -> StorageResult<BlobRef>;

    /// Reads a blob
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the blob does not exist.
    async fn get(&self, blob: &BlobRef) -> StorageResult<Vec<u8>>;

    /// Deletes a blob
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the blob does not exist. Callers
    /// that treat deletion as best-effort should check
    /// [`StorageError::is_not_found`](super::StorageError::is_not_found).
    async fn delete(&self, blob: &BlobRef) -> StorageResult<()>;

    /// Checks if a blob exists
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    async fn exists(&self, blob: &BlobRef) -> StorageResult<bool>;
}
