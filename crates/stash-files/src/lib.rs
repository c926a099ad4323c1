//! stash-files: file-storage coordination layer
//!
//! Keeps the object store and the relational metadata store in
//! agreement about which files exist, who owns them, and whether they
//! are deleted. Upload, delete and download run as saga-like sequences
//! across the two stores: ordered writes plus compensating actions
//! instead of a single atomic commit. Batch uploads fan out through
//! the same coordinator with all-or-nothing semantics.

pub mod batch;
pub mod config;
pub mod error;
pub mod identity;
pub mod repository;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::BatchItemFailure;
pub use config::FilePolicy;
pub use error::FileError;
pub use identity::{FixedIdentity, IdentityContext};
pub use repository::FileRepository;
pub use service::{FileService, NewUpload, UploadedFile};
