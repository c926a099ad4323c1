//! Object store contract consumed by the coordination layer

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

/// Puts, gets and deletes opaque byte blobs by string key.
///
/// Implementations provide no transactional guarantees; callers must
/// not assume a `put` and a later `delete` are atomic with anything.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a blob under `key` and return its public address.
    ///
    /// `expires_in` is advisory object expiry; backends that cannot
    /// expire objects ignore it.
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        expires_in: Option<Duration>,
    ) -> Result<String, StorageError>;

    /// Fetch the blob stored under `key`.
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Delete the blob stored under `key`. Deleting an absent key is
    /// not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
