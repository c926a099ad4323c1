//! Parallel upload dispatcher
//!
//! Fans a multi-file upload out to concurrent per-file attempts and
//! makes partial failure explicit. A batch is all-or-nothing from the
//! caller's point of view: blobs are written concurrently first, and
//! metadata is recorded only once every blob landed, so a blob-write
//! failure anywhere leaves no metadata behind. Failures are collected
//! per file and reported together, never swallowed.

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::FileError;
use crate::identity::{FixedIdentity, IdentityContext};
use crate::service::{FileService, NewUpload, UploadedFile};

/// One failed file within a batch upload
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemFailure {
    pub file_name: String,
    pub error: String,
}

/// A blob written in phase one, awaiting its metadata record
struct StagedBlob<'a> {
    upload: &'a NewUpload,
    key: String,
    url: String,
}

impl FileService {
    /// Upload N files as one atomic batch.
    ///
    /// Each file's blob write runs concurrently and independently; one
    /// file failing does not abort the others mid-flight. If any file
    /// failed, the blobs that did land are deleted again and the whole
    /// batch fails with the per-file errors enumerated.
    pub async fn upload_batch(
        &self,
        identity: &dyn IdentityContext,
        uploads: Vec<NewUpload>,
        cancel: &CancellationToken,
    ) -> Result<Vec<UploadedFile>, FileError> {
        let owner_id = identity.current_owner_id().await?;

        if uploads.is_empty() {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(FileError::Cancelled);
        }

        // Phase one: every blob, concurrently. Metadata stays
        // untouched until all of them landed.
        let results = join_all(uploads.iter().map(|upload| async move {
            self.check_size(upload)?;
            let key = self.storage_key(&upload.content_type, &upload.file_name);
            let url = self.store_blob(&key, upload).await?;
            Ok::<_, FileError>(StagedBlob { upload, key, url })
        }))
        .await;

        let mut staged = Vec::new();
        let mut failures = Vec::new();
        for (upload, result) in uploads.iter().zip(results) {
            match result {
                Ok(blob) => staged.push(blob),
                Err(err) => failures.push(BatchItemFailure {
                    file_name: upload.file_name.clone(),
                    error: err.to_string(),
                }),
            }
        }

        if !failures.is_empty() {
            self.scrub_staged_blobs(&staged, &mut failures).await;
            error!(
                "Batch upload failed for {} of {} file(s)",
                failures.len(),
                uploads.len()
            );
            return Err(FileError::BatchFailed { failures });
        }

        if cancel.is_cancelled() {
            // Cancellation is not a license to leak the staged blobs
            self.scrub_staged_blobs(&staged, &mut failures).await;
            if failures.is_empty() {
                return Err(FileError::Cancelled);
            }
            return Err(FileError::BatchFailed { failures });
        }

        // Phase two: metadata records, one quick transaction per file.
        // Sequential so failure handling stays deterministic.
        let mut recorded: Vec<UploadedFile> = Vec::new();
        let mut phase_two_failure: Option<(usize, FileError)> = None;
        for (idx, blob) in staged.iter().enumerate() {
            match self
                .record_metadata(owner_id, &blob.key, &blob.url, blob.upload)
                .await
            {
                Ok(record) => recorded.push(UploadedFile {
                    id: record.id,
                    storage_key: blob.key.clone(),
                    url: blob.url.clone(),
                }),
                Err(err) => {
                    phase_two_failure = Some((idx, err));
                    break;
                }
            }
        }

        if let Some((idx, err)) = phase_two_failure {
            let failed = &staged[idx];
            // The failed file's own blob, via the ordinary compensation
            let err = self.remove_blob_or_orphan(&failed.key, err).await;
            failures.push(BatchItemFailure {
                file_name: failed.upload.file_name.clone(),
                error: err.to_string(),
            });

            // Blobs past the failure point have no metadata yet
            self.scrub_staged_blobs(&staged[idx + 1..], &mut failures).await;

            // Committed siblings roll back through the tombstone path
            for (blob, done) in staged.iter().zip(&recorded) {
                if let Err(revert_err) = self
                    .delete(&FixedIdentity(owner_id), &done.storage_key, &CancellationToken::new())
                    .await
                {
                    error!(
                        "Failed to revert committed upload at {}: {}",
                        done.storage_key, revert_err
                    );
                    failures.push(BatchItemFailure {
                        file_name: blob.upload.file_name.clone(),
                        error: revert_err.to_string(),
                    });
                }
            }

            return Err(FileError::BatchFailed { failures });
        }

        info!(
            "Batch upload committed {} file(s) for owner {}",
            recorded.len(),
            owner_id
        );
        Ok(recorded)
    }

    /// Delete blobs that were staged but never recorded. A blob that
    /// cannot be deleted is reported as orphaned alongside the batch
    /// failures.
    async fn scrub_staged_blobs(
        &self,
        staged: &[StagedBlob<'_>],
        failures: &mut Vec<BatchItemFailure>,
    ) {
        for blob in staged {
            if let Err(err) = self.store.delete(&blob.key).await {
                let orphan = FileError::OrphanedBlob {
                    key: blob.key.clone(),
                    cause: err.to_string(),
                };
                error!("{}", orphan);
                failures.push(BatchItemFailure {
                    file_name: blob.upload.file_name.clone(),
                    error: orphan.to_string(),
                });
            }
        }
    }
}
