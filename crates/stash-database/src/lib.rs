//! Database connection utilities for the Stash metadata store

pub use sea_orm;
mod connection;

pub use connection::{establish_connection, DbConnection};

// Export test utilities for use by other crates in their tests
pub mod test_utils;
