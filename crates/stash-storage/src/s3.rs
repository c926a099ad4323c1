//! S3-compatible object store backend

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::ObjectStore;
use crate::error::StorageError;

/// Default bucket name for file blobs
pub const DEFAULT_BUCKET: &str = "stash-files";

/// Configuration for the S3 object store backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3StoreConfig {
    /// Bucket all blobs are stored in
    pub bucket: String,

    /// AWS region (also used to build public object URLs)
    pub region: String,

    /// Custom endpoint for S3-compatible stores (MinIO, RustFS).
    /// When set, path-style addressing is used.
    pub endpoint: Option<String>,
}

impl Default for S3StoreConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
        }
    }
}

impl S3StoreConfig {
    /// Public address of the object stored under `key`
    pub fn object_url(&self, key: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                key
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

/// Object store backed by S3 (or an S3-compatible service)
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    config: S3StoreConfig,
}

impl S3ObjectStore {
    /// Create a store from ambient AWS credentials and the given config
    pub async fn connect(config: S3StoreConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if config.endpoint.is_some() {
            s3_config = s3_config.force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config.build()),
            config,
        }
    }

    /// Create a store from an already-built client (used by embedders
    /// that manage their own credential loading)
    pub fn new(client: aws_sdk_s3::Client, config: S3StoreConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        expires_in: Option<Duration>,
    ) -> Result<String, StorageError> {
        debug!("PUT {} ({} bytes, {})", key, body.len(), content_type);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type);

        if let Some(expires_in) = expires_in {
            let expires_at = chrono::Utc::now()
                + chrono::Duration::from_std(expires_in)
                    .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
            request = request.expires(DateTime::from_secs(expires_at.timestamp()));
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        Ok(self.config.object_url(key))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        debug!("GET {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") || e.to_string().contains("404") {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::DownloadFailed(e.to_string())
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        Ok(data.into_bytes())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        debug!("DELETE {}", key);

        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(e.to_string()))?;

        Ok(())
    }
}
