//! Database connection management

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use stash_core::{DatabaseConfig, ServiceError, ServiceResult};
use std::sync::Arc;

pub type DbConnection = DatabaseConnection;

/// Establish a pooled connection to the metadata store.
///
/// Schema management is owned by the deployment's migration tooling,
/// not by this crate; the connection assumes the `files` table exists.
pub async fn establish_connection(config: &DatabaseConfig) -> ServiceResult<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new(&config.url);
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections);

    let db = Database::connect(opt)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    Ok(Arc::new(db))
}
