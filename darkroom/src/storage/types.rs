//! Core types for blob storage

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during blob storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Blob not found in storage
    #[error("Blob not found: {0}")]
    NotFound(BlobRef),

    /// I/O error during storage operation
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid blob reference or base path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Generic storage error
    #[error("Storage error: {0}")]
    Other(String),
}

impl StorageError {
    /// Whether this error reports a missing blob
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Location of an artifact in a [`BlobStore`](super::BlobStore)
///
/// References are opaque to the pipeline. The local adapter uses a
/// sharded relative path such as `3f/3fa85f64-5717-4562-b3fc-2c963f66afa6`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    /// Wraps an existing reference string
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The reference as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BlobRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for BlobRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
