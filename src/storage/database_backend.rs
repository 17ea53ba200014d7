//! Durable backend: SQLite through a shared sqlx pool.
//!
//! The generic key/value table is driven with plain sqlx queries; the
//! structured `products` table goes through the SeaORM entity in
//! `db_entities`, built on the same pool.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, EntityTrait, NotSet, QueryOrder, Set,
    SqlxSqliteConnector,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error_handling::types::StorageError;
use crate::storage::backend::Backend;
use crate::storage::db_entities as products;
use crate::storage::types::{parse_timestamp, timestamp, NewProduct, ProductRecord, StorageRecord};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS storage_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key_name TEXT UNIQUE NOT NULL,
        value_data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT,
        price REAL NOT NULL DEFAULT 0,
        stock INTEGER NOT NULL DEFAULT 0,
        category TEXT,
        image_url TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_storage_key ON storage_data(key_name);",
    "CREATE INDEX IF NOT EXISTS idx_products_name ON products(name);",
];

// Internal row mapping for the key/value table
#[derive(Debug, sqlx::FromRow)]
struct StorageRow {
    key_name: String,
    value_data: String,
    created_at: String,
    updated_at: String,
}

impl StorageRow {
    fn into_record(self) -> Result<StorageRecord, StorageError> {
        Ok(StorageRecord {
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            key: self.key_name,
            value: self.value_data,
        })
    }
}

#[derive(Clone)]
struct Connections {
    pool: SqlitePool,
    orm: DatabaseConnection,
}

pub struct DatabaseBackend {
    path: PathBuf,
    max_connections: u32,
    connections: RwLock<Option<Connections>>,
}

impl DatabaseBackend {
    /// Describes a database at `path` without touching the filesystem.
    ///
    /// Every primitive fails with `StorageError::Uninitialized` until `open` succeeds.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_connections: 1,
            connections: RwLock::new(None),
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Creates and opens the database at `path` in one step.
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let backend = Self::new(path);
        backend.open().await?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the pool and runs the idempotent schema creation.
    ///
    /// Calling `open` on an already open backend is a no-op.
    pub async fn open(&self) -> Result<(), StorageError> {
        if self.is_open() {
            debug!("Database {} already open", self.path.display());
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create database dir {}: {}", parent.display(), e);
                    StorageError::Initialization(e.to_string())
                })?;
            }
        }
        let opts = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(opts)
            .await
            .map_err(|e| {
                error!("Failed to open database {}: {}", self.path.display(), e);
                StorageError::Initialization(e.to_string())
            })?;
        for statement in SCHEMA {
            if let Err(e) = sqlx::query(statement).execute(&pool).await {
                error!("Failed to create schema in {}: {}", self.path.display(), e);
                pool.close().await;
                return Err(StorageError::Initialization(e.to_string()));
            }
        }
        let orm = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool.clone());
        *self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Connections { pool, orm });
        info!("Database opened at {}", self.path.display());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Closes the pool. Subsequent calls fail with `StorageError::Uninitialized`.
    pub async fn shutdown(&self) {
        let taken = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connections) = taken {
            connections.pool.close().await;
            info!("Database {} closed", self.path.display());
        }
    }

    fn connections(&self) -> Result<Connections, StorageError> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StorageError::Uninitialized)
    }

    /// Returns the full row stored under `key`, including its timestamps.
    pub async fn get_record(&self, key: &str) -> Result<Option<StorageRecord>, StorageError> {
        let conn = self.connections()?;
        let row: Option<StorageRow> = sqlx::query_as(
            "SELECT key_name, value_data, created_at, updated_at FROM storage_data WHERE key_name = ?1",
        )
        .bind(key)
        .fetch_optional(&conn.pool)
        .await
        .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        row.map(StorageRow::into_record).transpose()
    }

    /// Lists every key in the key/value table, sorted.
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.connections()?;
        sqlx::query_scalar("SELECT key_name FROM storage_data ORDER BY key_name ASC")
            .fetch_all(&conn.pool)
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    // ========== Product Operations ==========

    /// Inserts a product and returns it with its assigned id.
    pub async fn insert_product(&self, product: &NewProduct) -> Result<ProductRecord, StorageError> {
        let conn = self.connections()?;
        let now = timestamp(Utc::now());
        let model = products::ActiveModel {
            id: NotSet,
            name: Set(product.name.clone()),
            description: Set(product.description.clone()),
            price: Set(product.price),
            stock: Set(product.stock),
            category: Set(product.category.clone()),
            image_url: Set(product.image_url.clone()),
            created_at: Set(now.clone()),
            updated_at: Set(now),
        }
        .insert(&conn.orm)
        .await
        .map_err(|e| {
            error!("Failed to insert product {:?}: {}", product.name, e);
            StorageError::WriteFailed(e.to_string())
        })?;
        debug!("Inserted product {} ({})", model.id, model.name);
        model.into_record()
    }

    /// Lists products, newest first.
    pub async fn list_products(&self) -> Result<Vec<ProductRecord>, StorageError> {
        let conn = self.connections()?;
        let models = products::Entity::find()
            .order_by_desc(products::Column::CreatedAt)
            .order_by_desc(products::Column::Id)
            .all(&conn.orm)
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        models.into_iter().map(products::Model::into_record).collect()
    }

    pub async fn get_product(&self, id: i64) -> Result<Option<ProductRecord>, StorageError> {
        let conn = self.connections()?;
        products::Entity::find_by_id(id)
            .one(&conn.orm)
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
            .map(products::Model::into_record)
            .transpose()
    }

    /// Replaces every field of product `id`, keeping its `created_at`.
    pub async fn update_product(
        &self,
        id: i64,
        product: &NewProduct,
    ) -> Result<ProductRecord, StorageError> {
        let conn = self.connections()?;
        let existing = products::Entity::find_by_id(id)
            .one(&conn.orm)
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
            .ok_or(StorageError::ProductNotFound(id))?;
        let mut active: products::ActiveModel = existing.into();
        active.name = Set(product.name.clone());
        active.description = Set(product.description.clone());
        active.price = Set(product.price);
        active.stock = Set(product.stock);
        active.category = Set(product.category.clone());
        active.image_url = Set(product.image_url.clone());
        active.updated_at = Set(timestamp(Utc::now()));
        let model = active.update(&conn.orm).await.map_err(|e| {
            error!("Failed to update product {}: {}", id, e);
            StorageError::WriteFailed(e.to_string())
        })?;
        model.into_record()
    }

    /// Deletes product `id`. Returns whether a row was removed.
    pub async fn delete_product(&self, id: i64) -> Result<bool, StorageError> {
        let conn = self.connections()?;
        let result = products::Entity::delete_by_id(id)
            .exec(&conn.orm)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        if result.rows_affected == 0 {
            warn!("Product {} not found for deletion", id);
        }
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl Backend for DatabaseBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.connections()?;
        let now = timestamp(Utc::now());
        sqlx::query(
            "INSERT INTO storage_data (key_name, value_data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(key_name) DO UPDATE SET
               value_data = excluded.value_data,
               updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&conn.pool)
        .await
        .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.connections()?;
        sqlx::query_scalar("SELECT value_data FROM storage_data WHERE key_name = ?1")
            .bind(key)
            .fetch_optional(&conn.pool)
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.connections()?;
        sqlx::query("DELETE FROM storage_data WHERE key_name = ?1")
            .bind(key)
            .execute(&conn.pool)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StorageError> {
        let conn = self.connections()?;
        sqlx::query("DELETE FROM storage_data")
            .execute(&conn.pool)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) {
        self.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    async fn temp_db() -> (TempDir, DatabaseBackend) {
        let dir = TempDir::new().unwrap();
        let db = DatabaseBackend::connect(dir.path().join("test.db"))
            .await
            .unwrap();
        (dir, db)
    }

    fn widget(name: &str, stock: i64) -> NewProduct {
        NewProduct {
            name: name.into(),
            description: Some(format!("{} description", name)),
            price: 9.5,
            stock,
            category: Some("tools".into()),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_primitives_fail_before_open() {
        let dir = TempDir::new().unwrap();
        let db = DatabaseBackend::new(dir.path().join("never.db"));
        assert!(matches!(db.put("k", "1").await, Err(StorageError::Uninitialized)));
        assert!(matches!(db.get("k").await, Err(StorageError::Uninitialized)));
        assert!(matches!(db.delete("k").await, Err(StorageError::Uninitialized)));
        assert!(matches!(db.delete_all().await, Err(StorageError::Uninitialized)));
        assert!(matches!(db.list_products().await, Err(StorageError::Uninitialized)));
        assert!(!dir.path().join("never.db").exists());
    }

    #[tokio::test]
    async fn test_put_is_upsert_and_keeps_created_at() {
        let (_dir, db) = temp_db().await;
        assert_ok!(db.put("inventory_u1", "[1]").await);
        let first = db.get_record("inventory_u1").await.unwrap().unwrap();
        assert_ok!(db.put("inventory_u1", "[1,2]").await);
        let second = db.get_record("inventory_u1").await.unwrap().unwrap();

        assert_eq!(second.value, "[1,2]");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(db.keys().await.unwrap(), vec!["inventory_u1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_and_delete_all() {
        let (_dir, db) = temp_db().await;
        db.put("a", "1").await.unwrap();
        db.put("b", "2").await.unwrap();
        db.delete("a").await.unwrap();
        assert_eq!(db.get("a").await.unwrap(), None);
        assert_eq!(db.get("b").await.unwrap(), Some("2".to_string()));
        // deleting an absent key is fine
        assert_ok!(db.delete("a").await);
        db.delete_all().await.unwrap();
        assert!(db.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schema_creation_is_idempotent_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reopen.db");
        let db = DatabaseBackend::connect(&path).await.unwrap();
        db.put("userData", "{\"id\":\"admin\"}").await.unwrap();
        db.shutdown().await;
        assert_err!(db.get("userData").await);

        let reopened = DatabaseBackend::connect(&path).await.unwrap();
        assert_eq!(
            reopened.get("userData").await.unwrap().as_deref(),
            Some("{\"id\":\"admin\"}")
        );
    }

    #[tokio::test]
    async fn test_open_fails_when_parent_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let result = DatabaseBackend::connect(blocker.join("db.sqlite")).await;
        assert!(matches!(result, Err(StorageError::Initialization(_))));
    }

    #[tokio::test]
    async fn test_product_crud() {
        let (_dir, db) = temp_db().await;
        let hammer = db.insert_product(&widget("Hammer", 3)).await.unwrap();
        let saw = db.insert_product(&widget("Saw", 1)).await.unwrap();
        assert!(saw.id > hammer.id);

        let listed = db.list_products().await.unwrap();
        assert_eq!(
            listed.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["Saw", "Hammer"]
        );

        let updated = db
            .update_product(hammer.id, &widget("Claw hammer", 7))
            .await
            .unwrap();
        assert_eq!(updated.name, "Claw hammer");
        assert_eq!(updated.stock, 7);
        assert_eq!(updated.created_at, hammer.created_at);

        assert!(db.delete_product(saw.id).await.unwrap());
        assert!(!db.delete_product(saw.id).await.unwrap());
        assert_eq!(db.get_product(saw.id).await.unwrap(), None);
        assert_eq!(db.list_products().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_product() {
        let (_dir, db) = temp_db().await;
        let result = db.update_product(42, &widget("Ghost", 0)).await;
        assert!(matches!(result, Err(StorageError::ProductNotFound(42))));
    }

    #[tokio::test]
    async fn test_products_do_not_appear_in_key_value_table() {
        let (_dir, db) = temp_db().await;
        db.insert_product(&widget("Hammer", 3)).await.unwrap();
        assert!(db.keys().await.unwrap().is_empty());
    }
}
