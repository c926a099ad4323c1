//! Object store test doubles for coordinator unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use stash_storage::{MemoryObjectStore, ObjectStore, StorageError};

/// In-memory object store with fault injection and call counting
pub(crate) struct TestObjectStore {
    pub inner: MemoryObjectStore,
    fail_put_containing: Option<String>,
    fail_delete: AtomicBool,
    delete_calls: AtomicUsize,
}

impl TestObjectStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            fail_put_containing: None,
            fail_delete: AtomicBool::new(false),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Fail every `put` whose key contains `fragment`
    pub fn failing_put(fragment: &str) -> Self {
        Self {
            fail_put_containing: Some(fragment.to_string()),
            ..Self::new()
        }
    }

    /// Fail every `delete`
    pub fn failing_delete() -> Self {
        let store = Self::new();
        store.fail_delete.store(true, Ordering::SeqCst);
        store
    }

    /// Start failing every `delete` from now on
    pub fn fail_deletes(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    /// Number of `delete` calls observed
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for TestObjectStore {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        expires_in: Option<Duration>,
    ) -> Result<String, StorageError> {
        if let Some(fragment) = &self.fail_put_containing {
            if key.contains(fragment.as_str()) {
                return Err(StorageError::UploadFailed(format!(
                    "injected put failure for {}",
                    key
                )));
            }
        }
        self.inner.put(key, body, content_type, expires_in).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed(format!(
                "injected delete failure for {}",
                key
            )));
        }
        self.inner.delete(key).await
    }
}
