//! SeaORM entity model for the structured `products` table.
//!
//! The table itself is created by `database_backend`; timestamps are stored as
//! fixed-precision RFC3339 text so that ordering by `created_at` is chronological.

use sea_orm::entity::prelude::*;

use crate::error_handling::types::StorageError;
use crate::storage::types::{parse_timestamp, ProductRecord};

/// Products table entity model.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "products")]
pub struct Model {
    /// Auto-increment row id
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub stock: i64,
    pub category: Option<String>,
    pub image_url: Option<String>,
    /// RFC3339 creation timestamp
    pub created_at: String,
    /// RFC3339 last-update timestamp
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_record(self) -> Result<ProductRecord, StorageError> {
        Ok(ProductRecord {
            id: self.id,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            name: self.name,
            description: self.description,
            price: self.price,
            stock: self.stock,
            category: self.category,
            image_url: self.image_url,
        })
    }
}
