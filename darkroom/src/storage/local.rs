//! Local filesystem blob storage

use super::traits::BlobStore;
use super::types::{BlobRef, StorageError, StorageResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Local filesystem blob backend
///
/// Blobs are stored under a subdirectory named after the first 2 characters
/// of their UUID to avoid hitting filesystem limits on files per directory.
/// The blob reference is the relative path.
///
/// # Directory Structure
///
/// ```text
/// /var/lib/darkroom/blobs/
/// ├── 55/
/// │   └── 550e8400-e29b-41d4-a716-446655440000
/// ├── a3/
/// │   └── a3bb189e-8bf9-4a9a-b5c7-9f9c3b8e5d7a
/// ```
///
/// Writes go to a hidden temporary file first and are renamed into place, so
/// a reader never observes a partially written blob.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    /// Base directory for blob storage
    base_path: PathBuf,
}

impl LocalBlobStore {
    /// Creates a new local blob store rooted at `base_path`
    ///
    /// The directory is created lazily on first write.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidPath` if `base_path` exists and is not a
    /// directory.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        if base_path.exists() && !base_path.is_dir() {
            return Err(StorageError::InvalidPath(format!(
                "{} is not a directory",
                base_path.display()
            )));
        }

        Ok(Self { base_path })
    }

    /// Base directory of this store
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolves a reference to its path, rejecting anything that is not a
    /// `prefix/uuid` pair produced by [`put`](BlobStore::put).
    fn resolve(&self, blob: &BlobRef) -> StorageResult<PathBuf> {
        let invalid = || StorageError::InvalidPath(format!("malformed blob reference: {blob}"));

        let (prefix, name) = blob.as_str().split_once('/').ok_or_else(invalid)?;
        let id = Uuid::parse_str(name).map_err(|_| invalid())?;
        let canonical = id.to_string();
        if name != canonical || prefix != &canonical[..2] {
            return Err(invalid());
        }

        Ok(self.base_path.join(prefix).join(name))
    }
}

/// Write `data` to `temp_path` and move it to `final_path`.
///
/// The temporary file is removed if any step fails.
async fn write_then_rename(temp_path: &Path, final_path: &Path, data: &[u8]) -> std::io::Result<()> {
    let written = async {
        let mut file = fs::File::create(temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(temp_path, final_path).await
    }
    .await;

    if written.is_err() {
        if let Err(cleanup) = fs::remove_file(temp_path).await {
            if cleanup.kind() != ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", temp_path.display(), cleanup);
            }
        }
    }
    written
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, data: Vec<u8>) -> StorageResult<BlobRef> {
        let id = Uuid::new_v4().to_string();
        let prefix = &id[..2];

        let dir = self.base_path.join(prefix);
        fs::create_dir_all(&dir).await?;

        let temp_path = dir.join(format!(".{id}.tmp"));
        write_then_rename(&temp_path, &dir.join(&id), &data).await?;

        Ok(BlobRef::new(format!("{prefix}/{id}")))
    }

    async fn get(&self, blob: &BlobRef) -> StorageResult<Vec<u8>> {
        let path = self.resolve(blob)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(blob.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, blob: &BlobRef) -> StorageResult<()> {
        let path = self.resolve(blob)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(blob.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, blob: &BlobRef) -> StorageResult<bool> {
        let path = self.resolve(blob)?;
        Ok(fs::try_exists(&path).await?)
    }
}
