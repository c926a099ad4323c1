//! File Consistency Coordinator
//!
//! Orchestrates upload, delete and download across the object store
//! and the metadata store. The two stores fail independently, so every
//! multi-step operation is ordered to keep divergence out of the
//! caller-visible state: uploads write the blob first and compensate
//! on metadata failure; deletes flip the tombstone first and treat the
//! blob removal as best-effort-but-reported; downloads verify the
//! locked record before touching the object store.

use std::sync::Arc;

use bytes::Bytes;
use sea_orm::Set;
use stash_database::DbConnection;
use stash_entities::files;
use stash_storage::ObjectStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::{FilePolicy, STORAGE_KEY_PREFIX};
use crate::error::FileError;
use crate::identity::IdentityContext;
use crate::repository::FileRepository;

/// A single file to upload
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
    /// Object expiry override; falls back to the policy default
    pub expires_in: Option<std::time::Duration>,
}

impl NewUpload {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
            expires_in: None,
        }
    }

    pub fn size_bytes(&self) -> i64 {
        self.bytes.len() as i64
    }
}

/// Result of a successful upload
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub id: Uuid,
    pub storage_key: String,
    pub url: String,
}

/// Coordinates file state across the object store and the metadata store
pub struct FileService {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) repo: FileRepository,
    pub(crate) policy: FilePolicy,
}

impl FileService {
    pub fn new(db: Arc<DbConnection>, store: Arc<dyn ObjectStore>, policy: FilePolicy) -> Self {
        Self {
            store,
            repo: FileRepository::new(db),
            policy,
        }
    }

    /// Derive the storage key for a file. Collisions on (content type,
    /// file name) are possible by design and surface as `AlreadyExists`.
    pub fn storage_key(&self, content_type: &str, file_name: &str) -> String {
        format!("{}/{}/{}", STORAGE_KEY_PREFIX, content_type, file_name)
    }

    /// Upload a single file.
    ///
    /// The blob is written before any metadata is touched; a metadata
    /// failure afterwards deletes the just-written blob. The returned
    /// URL is only handed out once the metadata commit succeeded.
    pub async fn upload(
        &self,
        identity: &dyn IdentityContext,
        upload: NewUpload,
        cancel: &CancellationToken,
    ) -> Result<UploadedFile, FileError> {
        let owner_id = identity.current_owner_id().await?;
        self.check_size(&upload)?;

        if cancel.is_cancelled() {
            return Err(FileError::Cancelled);
        }

        let key = self.storage_key(&upload.content_type, &upload.file_name);
        let url = self.store_blob(&key, &upload).await?;

        // The blob exists from here on. Cancellation and every
        // metadata failure below must run the compensating delete.
        if cancel.is_cancelled() {
            return Err(self.remove_blob_or_orphan(&key, FileError::Cancelled).await);
        }

        match self.record_metadata(owner_id, &key, &url, &upload).await {
            Ok(record) => {
                info!("Uploaded '{}' to {} for owner {}", upload.file_name, key, owner_id);
                Ok(UploadedFile {
                    id: record.id,
                    storage_key: key,
                    url,
                })
            }
            Err(err) => Err(self.remove_blob_or_orphan(&key, err).await),
        }
    }

    /// Soft-delete the file at `key`.
    ///
    /// The tombstone commit happens before the object store is
    /// touched: metadata is the source of truth for existence, so it
    /// flips first. Deleting an already-deleted file succeeds without
    /// a metadata write.
    pub async fn delete(
        &self,
        identity: &dyn IdentityContext,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), FileError> {
        let owner_id = identity.current_owner_id().await?;

        if cancel.is_cancelled() {
            return Err(FileError::Cancelled);
        }

        let txn = self.repo.begin().await?;
        let record = self
            .repo
            .find_by_key_for_update(&txn, key)
            .await
            .map_err(|e| FileError::MetadataWriteFailed(e.to_string()))?
            .ok_or_else(|| FileError::NotFound(key.to_string()))?;

        if record.owner_id != owner_id {
            // transaction rolls back on drop; no state change
            error!("Owner {} attempted to delete file at {} owned by {}", owner_id, key, record.owner_id);
            return Err(FileError::Forbidden);
        }

        if record.is_deleted {
            // Idempotent: already deleted, release the lock and report success
            txn.commit()
                .await
                .map_err(|e| FileError::MetadataWriteFailed(e.to_string()))?;
            return Ok(());
        }

        self.repo
            .mark_deleted(&txn, record)
            .await
            .map_err(|e| FileError::MetadataWriteFailed(e.to_string()))?;
        txn.commit()
            .await
            .map_err(|e| FileError::MetadataWriteFailed(e.to_string()))?;

        // Blob removal runs after the commit and regardless of the
        // cancellation token; a failure here leaves a tombstoned record
        // with a stray blob, reported for the reconciliation sweep.
        if let Err(e) = self.store.delete(key).await {
            error!("File at {} is tombstoned but blob removal failed: {}", key, e);
            return Err(FileError::PartialDelete {
                key: key.to_string(),
                cause: e.to_string(),
            });
        }

        info!("Deleted file at {} for owner {}", key, owner_id);
        Ok(())
    }

    /// Download the file at `key`.
    ///
    /// The record is locked and verified first; the lock is released
    /// as soon as the fetch finishes, whatever its outcome.
    pub async fn download(
        &self,
        identity: &dyn IdentityContext,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<(Bytes, files::Model), FileError> {
        let owner_id = identity.current_owner_id().await?;

        if cancel.is_cancelled() {
            return Err(FileError::Cancelled);
        }

        let txn = self.repo.begin().await?;
        let record = self
            .repo
            .find_by_key_for_update(&txn, key)
            .await
            .map_err(|e| FileError::MetadataWriteFailed(e.to_string()))?
            .ok_or_else(|| FileError::NotFound(key.to_string()))?;

        if record.owner_id != owner_id {
            error!("Owner {} attempted to download file at {} owned by {}", owner_id, key, record.owner_id);
            return Err(FileError::Forbidden);
        }
        if record.is_deleted {
            return Err(FileError::Gone(key.to_string()));
        }

        let fetched = self.store.get(key).await;

        // Commit the read-only transaction either way to release the
        // row lock promptly.
        txn.commit()
            .await
            .map_err(|e| FileError::MetadataWriteFailed(e.to_string()))?;

        match fetched {
            Ok(bytes) => Ok((bytes, record)),
            Err(e) => {
                error!("File at {} is active but blob fetch failed: {}", key, e);
                Err(FileError::BlobUnavailable {
                    key: key.to_string(),
                    cause: e.to_string(),
                })
            }
        }
    }

    pub(crate) fn check_size(&self, upload: &NewUpload) -> Result<(), FileError> {
        let size = upload.size_bytes();
        if size > self.policy.max_upload_bytes {
            error!(
                "File '{}' size {} exceeds limit of {} bytes",
                upload.file_name, size, self.policy.max_upload_bytes
            );
            return Err(FileError::PayloadTooLarge {
                size,
                limit: self.policy.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Write the blob for `upload` under `key` and return its address
    pub(crate) async fn store_blob(&self, key: &str, upload: &NewUpload) -> Result<String, FileError> {
        let expiry = upload.expires_in.or(self.policy.default_expiry);
        self.store
            .put(key, upload.bytes.clone(), &upload.content_type, expiry)
            .await
            .map_err(|e| {
                error!("Failed to upload blob to {}: {}", key, e);
                FileError::UploadFailed(e.to_string())
            })
    }

    /// Record metadata for an already-written blob, inside one
    /// transaction: re-check the key is free, insert, commit.
    pub(crate) async fn record_metadata(
        &self,
        owner_id: i32,
        key: &str,
        url: &str,
        upload: &NewUpload,
    ) -> Result<files::Model, FileError> {
        let txn = self.repo.begin().await?;

        let existing = self
            .repo
            .find_live_by_key(&txn, key)
            .await
            .map_err(|e| FileError::MetadataWriteFailed(e.to_string()))?;
        if existing.is_some() {
            // transaction rolls back on drop
            debug!("Upload conflict: live record already at {}", key);
            return Err(FileError::AlreadyExists(key.to_string()));
        }

        let record = files::ActiveModel {
            owner_id: Set(owner_id),
            storage_key: Set(key.to_string()),
            display_name: Set(upload.file_name.clone()),
            content_type: Set(upload.content_type.clone()),
            size_bytes: Set(upload.size_bytes()),
            url_path: Set(url.to_string()),
            is_deleted: Set(false),
            ..Default::default()
        };
        let record = self
            .repo
            .insert(&txn, record)
            .await
            .map_err(|e| FileError::MetadataWriteFailed(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| FileError::MetadataWriteFailed(e.to_string()))?;

        Ok(record)
    }

    /// Compensating action: delete the blob at `key` after a failure.
    /// If the compensation itself fails, the blob is leaked; that is
    /// escalated to `OrphanedBlob` so the reconciliation sweep sees it.
    pub(crate) async fn remove_blob_or_orphan(&self, key: &str, cause: FileError) -> FileError {
        match self.store.delete(key).await {
            Ok(()) => cause,
            Err(delete_err) => {
                let orphan = FileError::OrphanedBlob {
                    key: key.to_string(),
                    cause: format!("{}; cleanup failed: {}", cause, delete_err),
                };
                error!("{}", orphan);
                orphan
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FixedIdentity;
    use crate::testing::TestObjectStore;
    use sea_orm::{DatabaseBackend, DbErr, MockDatabase};
    use stash_storage::MemoryObjectStore;

    const OWNER: i32 = 7;
    const KEY: &str = "file/application/pdf/report.pdf";

    fn pdf_upload() -> NewUpload {
        NewUpload::new("report.pdf", "application/pdf", Bytes::from_static(b"%PDF-1.7"))
    }

    fn record(owner_id: i32, is_deleted: bool) -> files::Model {
        files::Model {
            id: Uuid::new_v4(),
            owner_id,
            storage_key: KEY.to_string(),
            display_name: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 8,
            url_path: format!("memory://{}", KEY),
            is_deleted,
            created_at: chrono::Utc::now(),
        }
    }

    fn service_with(db: MockDatabase, store: Arc<dyn ObjectStore>) -> FileService {
        FileService::new(Arc::new(db.into_connection()), store, FilePolicy::default())
    }

    #[tokio::test]
    async fn test_upload_success_returns_url_after_commit() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // No live record at the key
            .append_query_results([Vec::<files::Model>::new()])
            // Insert returning
            .append_query_results([vec![record(OWNER, false)]]);
        let store = Arc::new(MemoryObjectStore::new());
        let service = service_with(db, store.clone());

        let uploaded = service
            .upload(&FixedIdentity(OWNER), pdf_upload(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(uploaded.storage_key, KEY);
        assert_eq!(uploaded.url, format!("memory://{}", KEY));
        assert!(store.contains(KEY).await);
    }

    #[tokio::test]
    async fn test_upload_rejects_oversized_payload() {
        let db = MockDatabase::new(DatabaseBackend::Postgres);
        let store = Arc::new(MemoryObjectStore::new());
        let service = FileService::new(
            Arc::new(db.into_connection()),
            store.clone(),
            FilePolicy {
                max_upload_bytes: 4,
                ..Default::default()
            },
        );

        let err = service
            .upload(&FixedIdentity(OWNER), pdf_upload(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FileError::PayloadTooLarge { size: 8, limit: 4 }));
        // Rejected before anything was written
        assert_eq!(store.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_upload_compensates_blob_when_metadata_insert_fails() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<files::Model>::new()])
            .append_query_errors([DbErr::Custom("insert failed".to_string())]);
        let store = Arc::new(MemoryObjectStore::new());
        let service = service_with(db, store.clone());

        let err = service
            .upload(&FixedIdentity(OWNER), pdf_upload(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FileError::MetadataWriteFailed(_)));
        // The just-written blob was deleted again
        assert_eq!(store.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_upload_conflict_on_existing_live_record() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![record(OWNER, false)]]);
        let store = Arc::new(MemoryObjectStore::new());
        let service = service_with(db, store.clone());

        let err = service
            .upload(&FixedIdentity(OWNER), pdf_upload(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FileError::AlreadyExists(_)));
        assert_eq!(store.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_upload_escalates_to_orphaned_blob_when_cleanup_fails() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<files::Model>::new()])
            .append_query_errors([DbErr::Custom("insert failed".to_string())]);
        let store = Arc::new(TestObjectStore::failing_delete());
        let service = service_with(db, store.clone());

        let err = service
            .upload(&FixedIdentity(OWNER), pdf_upload(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            FileError::OrphanedBlob { key, cause } => {
                assert_eq!(key, KEY);
                assert!(cause.contains("insert failed"));
            }
            other => panic!("expected OrphanedBlob, got {:?}", other),
        }
        // The blob is still there, leaked for the reconciliation sweep
        assert!(store.inner.contains(KEY).await);
    }

    #[tokio::test]
    async fn test_upload_cancelled_before_start() {
        let db = MockDatabase::new(DatabaseBackend::Postgres);
        let store = Arc::new(MemoryObjectStore::new());
        let service = service_with(db, store.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service
            .upload(&FixedIdentity(OWNER), pdf_upload(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Cancelled));
        assert_eq!(store.object_count().await, 0);
    }

    /// Object store that cancels the given token while serving `put`,
    /// simulating a caller giving up mid-upload
    struct CancelOnPutStore {
        inner: MemoryObjectStore,
        token: CancellationToken,
    }

    #[async_trait::async_trait]
    impl ObjectStore for CancelOnPutStore {
        async fn put(
            &self,
            key: &str,
            body: Bytes,
            content_type: &str,
            expires_in: Option<std::time::Duration>,
        ) -> Result<String, stash_storage::StorageError> {
            self.token.cancel();
            self.inner.put(key, body, content_type, expires_in).await
        }

        async fn get(&self, key: &str) -> Result<Bytes, stash_storage::StorageError> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> Result<(), stash_storage::StorageError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_upload_cancelled_after_blob_write_compensates() {
        let db = MockDatabase::new(DatabaseBackend::Postgres);
        let cancel = CancellationToken::new();
        let store = Arc::new(CancelOnPutStore {
            inner: MemoryObjectStore::new(),
            token: cancel.clone(),
        });
        let service = service_with(db, store.clone());

        let err = service
            .upload(&FixedIdentity(OWNER), pdf_upload(), &cancel)
            .await
            .unwrap_err();

        // Cancellation after the blob write still runs the
        // compensating delete; nothing is leaked.
        assert!(matches!(err, FileError::Cancelled));
        assert_eq!(store.inner.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_without_metadata_write() {
        // Only the locked read is mocked; a second metadata statement
        // would fail the test.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![record(OWNER, true)]]);
        let store = Arc::new(TestObjectStore::new());
        let service = service_with(db, store.clone());

        service
            .delete(&FixedIdentity(OWNER), KEY, &CancellationToken::new())
            .await
            .unwrap();

        // No blob deletion either: the first delete already removed it
        assert_eq!(store.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_delete_forbidden_for_non_owner() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![record(OWNER, false)]]);
        let store = Arc::new(TestObjectStore::new());
        let service = service_with(db, store.clone());

        let err = service
            .delete(&FixedIdentity(OWNER + 1), KEY, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FileError::Forbidden));
        assert_eq!(store.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_delete_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<files::Model>::new()]);
        let service = service_with(db, Arc::new(MemoryObjectStore::new()));

        let err = service
            .delete(&FixedIdentity(OWNER), KEY, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FileError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_reports_partial_delete_when_blob_removal_fails() {
        let live = record(OWNER, false);
        let mut tombstoned = live.clone();
        tombstoned.is_deleted = true;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![live]])
            .append_query_results([vec![tombstoned]]);
        let store = Arc::new(TestObjectStore::failing_delete());
        let service = service_with(db, store.clone());

        let err = service
            .delete(&FixedIdentity(OWNER), KEY, &CancellationToken::new())
            .await
            .unwrap_err();

        // Metadata flipped first; the stray blob is reported, not hidden
        assert!(matches!(err, FileError::PartialDelete { .. }));
    }

    #[tokio::test]
    async fn test_download_returns_bytes_and_record() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![record(OWNER, false)]]);
        let store = Arc::new(MemoryObjectStore::new());
        store
            .put(KEY, Bytes::from_static(b"%PDF-1.7"), "application/pdf", None)
            .await
            .unwrap();
        let service = service_with(db, store);

        let (bytes, model) = service
            .download(&FixedIdentity(OWNER), KEY, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bytes, Bytes::from_static(b"%PDF-1.7"));
        assert!(!model.is_deleted);
        assert_eq!(model.storage_key, KEY);
    }

    #[tokio::test]
    async fn test_download_gone_after_delete() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![record(OWNER, true)]]);
        let service = service_with(db, Arc::new(MemoryObjectStore::new()));

        let err = service
            .download(&FixedIdentity(OWNER), KEY, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FileError::Gone(_)));
    }

    #[tokio::test]
    async fn test_download_forbidden_for_non_owner() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![record(OWNER, false)]]);
        let service = service_with(db, Arc::new(MemoryObjectStore::new()));

        let err = service
            .download(&FixedIdentity(OWNER + 1), KEY, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FileError::Forbidden));
    }

    #[tokio::test]
    async fn test_download_blob_unavailable_is_reported() {
        // Metadata says active but the object store has no blob
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![record(OWNER, false)]]);
        let service = service_with(db, Arc::new(MemoryObjectStore::new()));

        let err = service
            .download(&FixedIdentity(OWNER), KEY, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FileError::BlobUnavailable { .. }));
    }

    #[test]
    fn test_storage_key_derivation() {
        let db = MockDatabase::new(DatabaseBackend::Postgres);
        let service = service_with(db, Arc::new(MemoryObjectStore::new()));

        assert_eq!(
            service.storage_key("application/pdf", "report.pdf"),
            "file/application/pdf/report.pdf"
        );
    }
}
