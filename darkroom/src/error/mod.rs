//! Error types and error handling
//!
//! Each layer has its own error enum; [`DarkroomError`] collects them for
//! callers that wire the whole system together.

use crate::config::ConfigError;
use crate::jobs::{PipelineError, StoreError};
use crate::storage::StorageError;
use crate::transform::TransformError;
use thiserror::Error;

/// Result type using [`DarkroomError`]
pub type Result<T> = std::result::Result<T, DarkroomError>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum DarkroomError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Job record store error
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    /// Blob storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Pipeline operation error
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Transform error outside of a job
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// Logging could not be initialized
    #[error("Observability error: {0}")]
    Observability(String),
}
