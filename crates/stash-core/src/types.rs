//! Custom types for common data structures

use chrono::{DateTime as ChronoDateTime, Utc};

/// Database DateTime type used across all Stash crates
///
/// This is the canonical datetime type for database TIMESTAMPTZ columns.
///
/// # Example
/// ```rust
/// use stash_core::DBDateTime;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// pub struct Response {
///     pub created_at: DBDateTime,
/// }
/// ```
pub type DBDateTime = ChronoDateTime<Utc>;

/// Standard UTC DateTime type used across all Stash crates
///
/// Serializes as ISO 8601 with 'Z' suffix: `2025-10-12T12:15:47.609192Z`.
pub type UtcDateTime = ChronoDateTime<Utc>;
