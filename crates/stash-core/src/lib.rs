//! Core utilities and types shared across all Stash crates

pub mod config;
pub mod error;
pub mod problemdetails;
pub mod types;

// Re-export commonly used types
pub use config::*;
pub use error::*;
pub use types::*;

// Re-export external dependencies
pub use anyhow;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;
