//! File service policy configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default upload size limit (10 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: i64 = 10 * 1024 * 1024;
/// Prefix for derived storage keys
pub const STORAGE_KEY_PREFIX: &str = "file";
/// Default object expiry (24 hours)
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Policy values injected into the coordinator at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePolicy {
    /// Maximum accepted payload size in bytes
    pub max_upload_bytes: i64,

    /// Object expiry applied when an upload does not specify one
    pub default_expiry: Option<Duration>,
}

impl Default for FilePolicy {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            default_expiry: Some(DEFAULT_EXPIRY),
        }
    }
}
