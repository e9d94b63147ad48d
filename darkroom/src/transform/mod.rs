//! Transform executor capability
//!
//! The pipeline treats the transform as a black box: bytes in, bytes out,
//! or an error. Latency is bounded by the pipeline's executor timeout, not
//! by the executor itself.

mod grayscale;

pub use grayscale::GrayscaleResize;

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a [`TransformExecutor`]
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// Input bytes could not be decoded
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The transform ran but could not produce output
    #[error("transform failed: {0}")]
    Failed(String),
}

/// Applies a transformation to an artifact
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use darkroom::transform::{TransformError, TransformExecutor};
///
/// struct Reverse;
///
/// #[async_trait]
/// impl TransformExecutor for Reverse {
///     async fn apply(&self, mut input: Vec<u8>) -> Result<Vec<u8>, TransformError> {
///         input.reverse();
///         Ok(input)
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransformExecutor: Send + Sync {
    /// Transforms `input` into the output artifact
    ///
    /// # Errors
    ///
    /// Returns a [`TransformError`] when the input is unusable or the
    /// transformation fails. The error text is recorded on the job.
    async fn apply(&self, input: Vec<u8>) -> Result<Vec<u8>, TransformError>;
}
