//! Metadata repository adapter for file records
//!
//! Thin SeaORM layer over the `files` table. All lookups go through
//! `storage_key` — it is the only stable external identifier; the uuid
//! primary key never leaves the database layer.

use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbErr, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use stash_database::DbConnection;
use stash_entities::files;

use crate::error::FileError;

/// CRUD plus row-level locking over file metadata records
#[derive(Clone)]
pub struct FileRepository {
    db: Arc<DbConnection>,
}

impl FileRepository {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    /// Open a metadata transaction. The returned transaction rolls
    /// back on drop unless committed.
    pub async fn begin(&self) -> Result<DatabaseTransaction, FileError> {
        self.db
            .begin()
            .await
            .map_err(|e| FileError::MetadataWriteFailed(e.to_string()))
    }

    /// Find the live (non-deleted) record at `key`, if any
    pub async fn find_live_by_key<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: &str,
    ) -> Result<Option<files::Model>, DbErr> {
        files::Entity::find()
            .filter(files::Column::StorageKey.eq(key))
            .filter(files::Column::IsDeleted.eq(false))
            .one(conn)
            .await
    }

    /// Find the record at `key` with a row lock (SELECT ... FOR UPDATE),
    /// held until the transaction commits or rolls back.
    ///
    /// Tombstoned records are returned too, so callers can distinguish
    /// "deleted" from "never existed". When a key has both a live row
    /// and tombstones from earlier reuse, the live row wins.
    pub async fn find_by_key_for_update(
        &self,
        txn: &DatabaseTransaction,
        key: &str,
    ) -> Result<Option<files::Model>, DbErr> {
        files::Entity::find()
            .filter(files::Column::StorageKey.eq(key))
            .order_by_asc(files::Column::IsDeleted)
            .lock_exclusive()
            .one(txn)
            .await
    }

    /// Insert a new file record inside `txn`
    pub async fn insert(
        &self,
        txn: &DatabaseTransaction,
        record: files::ActiveModel,
    ) -> Result<files::Model, DbErr> {
        record.insert(txn).await
    }

    /// Flip the tombstone flag on `record`. The transition is
    /// monotonic: callers only reach this for live records.
    pub async fn mark_deleted(
        &self,
        txn: &DatabaseTransaction,
        record: files::Model,
    ) -> Result<files::Model, DbErr> {
        let mut active = record.into_active_model();
        active.is_deleted = Set(true);
        active.update(txn).await
    }
}
