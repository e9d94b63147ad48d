//! In-memory blob storage

use super::traits::BlobStore;
use super::types::{BlobRef, StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Blob store held entirely in memory
///
/// Useful for tests and for single-process deployments that do not need
/// artifacts to survive a restart. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<BlobRef, Arc<Vec<u8>>>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Whether the store holds no blobs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Vec<u8>) -> StorageResult<BlobRef> {
        let blob = BlobRef::new(format!("mem/{}", Uuid::new_v4()));
        self.blobs.write().insert(blob.clone(), Arc::new(data));
        Ok(blob)
    }

    async fn get(&self, blob: &BlobRef) -> StorageResult<Vec<u8>> {
        self.blobs
            .read()
            .get(blob)
            .map(|data| data.as_ref().clone())
            .ok_or_else(|| StorageError::NotFound(blob.clone()))
    }

    async fn delete(&self, blob: &BlobRef) -> StorageResult<()> {
        self.blobs
            .write()
            .remove(blob)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(blob.clone()))
    }

    async fn exists(&self, blob: &BlobRef) -> StorageResult<bool> {
        Ok(self.blobs.read().contains_key(blob))
    }
}
