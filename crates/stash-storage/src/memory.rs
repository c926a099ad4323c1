//! In-memory object store for tests and local development

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use crate::client::ObjectStore;
use crate::error::StorageError;

struct StoredObject {
    body: Bytes,
    #[allow(dead_code)]
    content_type: String,
}

/// Object store that keeps blobs in process memory
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether a blob exists under `key`
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        _expires_in: Option<Duration>,
    ) -> Result<String, StorageError> {
        debug!("PUT {} ({} bytes)", key, body.len());

        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );

        Ok(format!("memory://{}", key))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|obj| obj.body.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        debug!("DELETE {}", key);

        self.objects.write().await.remove(key);
        Ok(())
    }
}
