//! Files entity
//!
//! One row per logical file. Rows are soft-deleted: `is_deleted` flips
//! to true exactly once and the row is kept as an audit tombstone.
//! `storage_key` is the external identifier; the uuid primary key is
//! internal and never accepted from callers.

use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use stash_core::DBDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub owner_id: i32,
    #[sea_orm(column_type = "String(StringLen::N(255))")]
    pub storage_key: String,
    #[sea_orm(column_type = "String(StringLen::N(255))")]
    pub display_name: String,
    #[sea_orm(column_type = "String(StringLen::N(100))")]
    pub content_type: String,
    pub size_bytes: i64,
    #[sea_orm(column_type = "String(StringLen::N(512))")]
    pub url_path: String,
    pub is_deleted: bool,
    pub created_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if insert {
            if self.id.is_not_set() {
                self.id = Set(Uuid::new_v4());
            }
            if self.created_at.is_not_set() {
                self.created_at = Set(chrono::Utc::now());
            }
        }

        Ok(self)
    }
}
