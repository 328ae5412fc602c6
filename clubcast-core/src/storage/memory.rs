//! In-memory object storage backend, for testing.

use super::{ObjectStorage, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;

/// In-memory [`ObjectStorage`]: buckets are maps of key → bytes.
#[derive(Default)]
pub struct MemoryStorage {
    buckets: DashMap<String, DashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored object contents, if present.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets
            .get(bucket)
            .and_then(|b| b.get(key).map(|o| o.clone()))
    }

    #[must_use]
    pub fn bucket_exists(&self, bucket: &str) -> bool {
        self.buckets.contains_key(bucket)
    }

    /// Keys stored in `bucket`, unordered.
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .get(bucket)
            .map(|b| b.iter().map(|o| o.key().clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn create_bucket(&self, name: &str, _region: &str) -> Result<(), StorageError> {
        // Tolerates a bucket that already exists.
        self.buckets.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        file: &std::path::Path,
    ) -> Result<(), StorageError> {
        let data = tokio::fs::read(file).await?;
        let bucket = self
            .buckets
            .get(bucket)
            .ok_or_else(|| StorageError::Other(format!("bucket '{bucket}' does not exist")))?;
        bucket.insert(key.to_string(), data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_create_bucket_idempotent() {
        let storage = MemoryStorage::new();
        storage.create_bucket("club", "eu-west-3").await.unwrap();
        storage.create_bucket("club", "eu-west-3").await.unwrap();
        assert!(storage.bucket_exists("club"));
    }

    #[tokio::test]
    async fn test_upload_object() {
        let storage = MemoryStorage::new();
        storage.create_bucket("club", "eu-west-3").await.unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"artifact").unwrap();

        storage
            .upload_object("club", "event/recording.ogg", file.path())
            .await
            .unwrap();

        assert_eq!(
            storage.object("club", "event/recording.ogg").unwrap(),
            b"artifact"
        );
    }

    #[tokio::test]
    async fn test_upload_to_missing_bucket_fails() {
        let storage = MemoryStorage::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = storage
            .upload_object("nope", "k", file.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Other(_)));
    }
}
