//! Error types for the file coordination layer
//!
//! Every operation fails with a specific, discriminated kind so
//! callers can decide whether to retry. The divergence kinds
//! (`OrphanedBlob`, `PartialDelete`, `BlobUnavailable`) mark windows
//! where the two stores disagree; they are logged at error level for
//! the out-of-band reconciliation sweep and never retried inline.

use axum::http::StatusCode;
use stash_core::problemdetails::{self, Problem};
use thiserror::Error;

use crate::batch::BatchItemFailure;

/// Errors that can occur in the file coordination layer
#[derive(Error, Debug)]
pub enum FileError {
    #[error("File size {size} exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: i64, limit: i64 },

    #[error("Failed to upload file to object store: {0}")]
    UploadFailed(String),

    #[error("File already exists at key '{0}'")]
    AlreadyExists(String),

    #[error("Failed to write file metadata: {0}")]
    MetadataWriteFailed(String),

    #[error("Blob orphaned at key '{key}': {cause}")]
    OrphanedBlob { key: String, cause: String },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: caller does not own this file")]
    Forbidden,

    #[error("File has been deleted: {0}")]
    Gone(String),

    #[error("File marked deleted but blob removal failed at key '{key}': {cause}")]
    PartialDelete { key: String, cause: String },

    #[error("File is active but blob fetch failed at key '{key}': {cause}")]
    BlobUnavailable { key: String, cause: String },

    #[error("Authentication error")]
    Unauthenticated,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Batch upload failed: {} file(s) failed", .failures.len())]
    BatchFailed { failures: Vec<BatchItemFailure> },
}

impl From<FileError> for Problem {
    fn from(error: FileError) -> Self {
        match error {
            FileError::PayloadTooLarge { size, limit } => {
                problemdetails::new(StatusCode::PAYLOAD_TOO_LARGE)
                    .with_title("Payload Too Large")
                    .with_detail(format!("File size {} exceeds limit of {} bytes", size, limit))
            }

            FileError::UploadFailed(msg) => problemdetails::new(StatusCode::BAD_GATEWAY)
                .with_title("Upload Failed")
                .with_detail(msg),

            FileError::AlreadyExists(key) => problemdetails::new(StatusCode::CONFLICT)
                .with_title("File Already Exists")
                .with_detail(format!("A file already exists at key '{}'", key)),

            FileError::MetadataWriteFailed(msg) => {
                problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_title("Metadata Write Failed")
                    .with_detail(msg)
            }

            FileError::OrphanedBlob { key, cause } => {
                problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_title("Orphaned Blob")
                    .with_detail(format!("Blob at key '{}' needs reconciliation: {}", key, cause))
            }

            FileError::NotFound(key) => problemdetails::new(StatusCode::NOT_FOUND)
                .with_title("File Not Found")
                .with_detail(format!("No file at key '{}'", key)),

            FileError::Forbidden => problemdetails::new(StatusCode::FORBIDDEN)
                .with_title("Forbidden")
                .with_detail("You do not own this file"),

            FileError::Gone(key) => problemdetails::new(StatusCode::GONE)
                .with_title("File Deleted")
                .with_detail(format!("The file at key '{}' has been deleted", key)),

            FileError::PartialDelete { key, cause } => {
                problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_title("Partial Delete")
                    .with_detail(format!(
                        "File at key '{}' is deleted but its blob remains: {}",
                        key, cause
                    ))
            }

            FileError::BlobUnavailable { key, cause } => {
                problemdetails::new(StatusCode::BAD_GATEWAY)
                    .with_title("Blob Unavailable")
                    .with_detail(format!("Blob at key '{}' could not be fetched: {}", key, cause))
            }

            FileError::Unauthenticated => problemdetails::new(StatusCode::UNAUTHORIZED)
                .with_title("Authentication Error")
                .with_detail("Could not resolve the acting principal"),

            FileError::Cancelled => problemdetails::new(StatusCode::REQUEST_TIMEOUT)
                .with_title("Operation Cancelled")
                .with_detail("The operation was cancelled by its caller"),

            FileError::BatchFailed { failures } => {
                let details: Vec<serde_json::Value> = failures
                    .iter()
                    .map(|f| {
                        serde_json::json!({
                            "file_name": f.file_name,
                            "error": f.error,
                        })
                    })
                    .collect();
                problemdetails::new(StatusCode::BAD_GATEWAY)
                    .with_title("Batch Upload Failed")
                    .with_detail(format!("{} file(s) failed to upload", failures.len()))
                    .with_value("failures", details)
            }
        }
    }
}
