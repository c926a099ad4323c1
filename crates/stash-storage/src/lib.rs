//! stash-storage: Object store client for the Stash platform
//!
//! Defines the `ObjectStore` contract consumed by the file
//! coordination layer, with an S3-compatible backend and an in-memory
//! backend for tests and local development. The object store has no
//! transactional semantics of its own; consistency with the metadata
//! store is the coordinator's job.

pub mod client;
pub mod error;
pub mod memory;
pub mod s3;

pub use client::ObjectStore;
pub use error::StorageError;
pub use memory::MemoryObjectStore;
pub use s3::{S3ObjectStore, S3StoreConfig};
