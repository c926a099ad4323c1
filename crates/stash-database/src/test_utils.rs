//! Test utilities for database integration tests
//!
//! Provides a reusable PostgreSQL testcontainer setup for integration
//! testing across the Stash crates. Schema migration tooling lives
//! outside this workspace, so the test database creates the `files`
//! table itself before handing out connections.

use crate::DbConnection;
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, Statement};
use std::sync::Arc;
use testcontainers::{runners::AsyncRunner, ContainerAsync, GenericImage, ImageExt};
use tokio::sync::{Mutex, OnceCell};

/// Shared test database container that lives for the duration of the test run
static TEST_CONTAINER: OnceCell<Arc<Mutex<SharedContainer>>> = OnceCell::const_new();

/// DDL for the files table, matching the production schema
const FILES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id UUID PRIMARY KEY,
    owner_id INTEGER NOT NULL,
    storage_key VARCHAR(255) NOT NULL,
    display_name VARCHAR(255) NOT NULL,
    content_type VARCHAR(100) NOT NULL,
    size_bytes BIGINT NOT NULL,
    url_path VARCHAR(512) NOT NULL,
    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_owner_id ON files (owner_id);
CREATE UNIQUE INDEX IF NOT EXISTS uq_files_storage_key_live
    ON files (storage_key) WHERE NOT is_deleted;
"#;

/// Shared container wrapper that holds the database container and connection details
struct SharedContainer {
    #[allow(dead_code)]
    container: ContainerAsync<GenericImage>,
    database_url: String,
}

impl SharedContainer {
    async fn new() -> anyhow::Result<Self> {
        let db_name = "test_db";
        let username = "test_user";
        let password = "test_password";

        let postgres_container = GenericImage::new("postgres", "17-alpine")
            .with_env_var("POSTGRES_DB", db_name)
            .with_env_var("POSTGRES_USER", username)
            .with_env_var("POSTGRES_PASSWORD", password)
            .with_env_var("POSTGRES_HOST_AUTH_METHOD", "trust")
            .start()
            .await?;

        let port = postgres_container.get_host_port_ipv4(5432).await?;
        let database_url = format!(
            "postgresql://{}:{}@localhost:{}/{}",
            username, password, port, db_name
        );

        // Wait for the database to accept connections
        tokio::time::sleep(tokio::time::Duration::from_secs(3)).await;

        Ok(Self {
            container: postgres_container,
            database_url,
        })
    }
}

/// Test database setup backed by a shared PostgreSQL container
pub struct TestDatabase {
    pub db: Arc<DbConnection>,
    pub database_url: String,
}

impl TestDatabase {
    /// Get or create the shared database container
    async fn get_or_create_container() -> anyhow::Result<Arc<Mutex<SharedContainer>>> {
        TEST_CONTAINER
            .get_or_try_init(|| async {
                let container = SharedContainer::new().await?;
                Ok(Arc::new(Mutex::new(container)))
            })
            .await
            .map(Arc::clone)
    }

    /// Create a new test database handle (uses the shared container).
    ///
    /// This function:
    /// 1. Gets or creates the shared PostgreSQL container (once per test run)
    /// 2. Establishes a fresh connection
    /// 3. Creates the schema and truncates tables for test isolation
    pub async fn new() -> anyhow::Result<Self> {
        let container = Self::get_or_create_container().await?;
        let container_lock = container.lock().await;
        let database_url = container_lock.database_url.clone();
        drop(container_lock); // Release lock early

        let db = Self::connect_with_retry(&database_url, 20).await?;

        let test_db = TestDatabase {
            db: Arc::new(db),
            database_url,
        };

        test_db.create_schema().await?;
        test_db.cleanup_all_tables().await?;

        Ok(test_db)
    }

    async fn connect_with_retry(
        database_url: &str,
        mut retries: u32,
    ) -> anyhow::Result<DbConnection> {
        loop {
            match Database::connect(database_url).await {
                Ok(db) => return Ok(db),
                Err(e) if retries > 0 => {
                    retries -= 1;
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                    if retries == 0 {
                        return Err(anyhow::anyhow!(
                            "Failed to connect to database after retries: {}",
                            e
                        ));
                    }
                }
                Err(e) => return Err(anyhow::anyhow!("Failed to connect to database: {}", e)),
            }
        }
    }

    /// Create the files table if it does not exist yet
    async fn create_schema(&self) -> anyhow::Result<()> {
        for ddl in FILES_TABLE_DDL.split(';') {
            let ddl = ddl.trim();
            if ddl.is_empty() {
                continue;
            }
            self.db
                .execute(Statement::from_string(
                    DatabaseBackend::Postgres,
                    ddl.to_owned(),
                ))
                .await?;
        }
        Ok(())
    }

    /// Truncate all tables to ensure test isolation
    pub async fn cleanup_all_tables(&self) -> anyhow::Result<()> {
        self.db
            .execute(Statement::from_string(
                DatabaseBackend::Postgres,
                "TRUNCATE TABLE files".to_owned(),
            ))
            .await?;
        Ok(())
    }
}
