//! Object storage abstraction for recording uploads.
//!
//! Backends:
//! - `OssStorage`: S3-compatible object storage via OpenDAL
//! - `MemoryStorage`: in-memory (for testing)

pub mod memory;
pub mod oss;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend: {0}")]
    Backend(#[from] opendal::Error),
    #[error("{0}")]
    Other(String),
}

/// Bucket-scoped upload sink used for recording artifacts.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Ensure `name` exists in `region`. Idempotent: a bucket that already
    /// exists (or is already owned by the caller) is success.
    async fn create_bucket(&self, name: &str, region: &str) -> Result<(), StorageError>;

    /// Upload the file at `file` under `bucket`/`key`.
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        file: &std::path::Path,
    ) -> Result<(), StorageError>;
}

pub use memory::MemoryStorage;
pub use oss::{OssConfig, OssStorage};
