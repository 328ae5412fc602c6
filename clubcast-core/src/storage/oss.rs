//! S3-compatible object storage backend.
//!
//! Uses OpenDAL for unified storage access (AWS S3, Minio, Aliyun OSS, any
//! S3-compatible endpoint). Buckets are addressed lazily: one operator per
//! bucket, cached for the lifetime of the client.

use super::{ObjectStorage, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use opendal::{services::S3, Operator};

/// OSS storage configuration
#[derive(Debug, Clone)]
pub struct OssConfig {
    /// Endpoint, e.g. "https://s3.amazonaws.com" or a Minio address
    pub endpoint: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
}

/// S3-compatible [`ObjectStorage`] backend.
pub struct OssStorage {
    config: OssConfig,
    operators: DashMap<String, Operator>,
}

impl OssStorage {
    #[must_use]
    pub fn new(config: OssConfig) -> Self {
        tracing::info!(endpoint = %config.endpoint, "initializing OSS storage");
        Self {
            config,
            operators: DashMap::new(),
        }
    }

    fn operator_for(&self, bucket: &str, region: &str) -> Result<Operator, StorageError> {
        if let Some(op) = self.operators.get(bucket) {
            return Ok(op.clone());
        }

        let builder = S3::default()
            .endpoint(&self.config.endpoint)
            .access_key_id(&self.config.access_key_id)
            .secret_access_key(&self.config.secret_access_key)
            .region(region)
            .bucket(bucket);

        let operator = Operator::new(builder)?.finish();
        self.operators.insert(bucket.to_string(), operator.clone());
        Ok(operator)
    }
}

#[async_trait]
impl ObjectStorage for OssStorage {
    /// OpenDAL cannot issue CreateBucket against S3; deployments are
    /// expected to pre-provision buckets. This verifies the bucket is
    /// reachable with the configured credentials, which also makes an
    /// already-existing bucket a success, keeping the idempotency contract.
    async fn create_bucket(&self, name: &str, region: &str) -> Result<(), StorageError> {
        let operator = self.operator_for(name, region)?;
        operator.check().await?;
        Ok(())
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        file: &std::path::Path,
    ) -> Result<(), StorageError> {
        let operator = self
            .operators
            .get(bucket)
            .map(|op| op.clone())
            .ok_or_else(|| StorageError::Other(format!("bucket '{bucket}' not initialized")))?;

        let data = tokio::fs::read(file).await?;
        let size = data.len();
        operator.write(key, data).await?;

        tracing::debug!(bucket, key, size, "uploaded object");
        Ok(())
    }
}
