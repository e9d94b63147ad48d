//! Blob storage for original and transformed artifacts
//!
//! The pipeline only talks to the [`BlobStore`] trait. Two backends ship
//! with the crate:
//! - [`LocalBlobStore`]: sharded directories on the local filesystem
//! - [`MemoryBlobStore`]: a process-local map, for tests and ephemeral runs

mod local;
mod memory;
mod traits;
mod types;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use traits::BlobStore;
#[cfg(test)]
pub use traits::MockBlobStore;
pub use types::{BlobRef, StorageError, StorageResult};
