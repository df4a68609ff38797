// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL durable store (MySQL or SQLite via the sqlx `Any` driver).
//!
//! Schema:
//! ```sql
//! CREATE TABLE records (
//!   id VARCHAR(64) PRIMARY KEY,
//!   content LONGTEXT NOT NULL,
//!   status BIGINT NOT NULL DEFAULT 1,
//!   created_at BIGINT NOT NULL,   -- epoch millis
//!   updated_at BIGINT NOT NULL    -- epoch millis
//! )
//! ```
//!
//! Every mutation runs in its own transaction. Updates re-read the row
//! inside the same transaction so the caller gets the committed state
//! without a second round-trip outside the transaction boundary.
//!
//! ## sqlx Any Driver Quirks
//!
//! MySQL `LONGTEXT` comes back as bytes through the `Any` driver, so text
//! columns are read as `String` first and then as `Vec<u8>`.

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Once;
use std::time::Duration;

use super::traits::{DurableStore, StorageError};
use crate::record::{Record, RecordPatch};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const SELECT_BY_ID: &str =
    "SELECT id, content, status, created_at, updated_at FROM records WHERE id = ?";

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStore {
    /// Connect with the default pool size (20) and create the table if missing.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_max_connections(connection_string, 20).await
    }

    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn with_max_connections(
        connection_string: &str,
        max_connections: u32,
    ) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(StorageError::backend)
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// SQLite WAL mode lets readers proceed while a writer holds the database.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id VARCHAR(64) PRIMARY KEY,
                content LONGTEXT NOT NULL,
                status BIGINT NOT NULL DEFAULT 1,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                INDEX idx_updated_at (updated_at)
            )
            "#
        };

        retry("sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(StorageError::backend)
        })
        .await?;

        Ok(())
    }

    /// Count stored records.
    pub async fn count_all(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM records")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::backend)?;

        let count: i64 = row.try_get("cnt").map_err(StorageError::backend)?;
        Ok(count as u64)
    }
}

/// Read a text column as String (SQLite TEXT) or bytes (MySQL LONGTEXT).
fn text_column(row: &AnyRow, name: &str) -> Result<String, StorageError> {
    if let Ok(s) = row.try_get::<String, _>(name) {
        return Ok(s);
    }
    let bytes: Vec<u8> = row.try_get(name).map_err(StorageError::backend)?;
    String::from_utf8(bytes)
        .map_err(|e| StorageError::Backend(format!("Column '{}' is not UTF-8: {}", name, e)))
}

fn record_from_row(row: &AnyRow) -> Result<Record, StorageError> {
    let id = text_column(row, "id")?;
    let content = text_column(row, "content")?;
    let status: i64 = row.try_get("status").map_err(StorageError::backend)?;
    let created_at: i64 = row.try_get("created_at").map_err(StorageError::backend)?;
    let updated_at: i64 = row.try_get("updated_at").map_err(StorageError::backend)?;

    let status = i32::try_from(status)
        .map_err(|_| StorageError::Backend(format!("Status out of range for '{}': {}", id, status)))?;

    Ok(Record::reconstruct(id, content, status, created_at, updated_at))
}

#[async_trait]
impl DurableStore for SqlStore {
    async fn put(&self, record: &Record) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::backend)?;

        sqlx::query(
            "INSERT INTO records (id, content, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.content)
        .bind(i64::from(record.status))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::backend)?;

        tx.commit().await.map_err(StorageError::backend)
    }

    async fn update_fields(&self, id: &str, patch: &RecordPatch) -> Result<Record, StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::backend)?;

        // rows_affected is not used for existence: MySQL reports 0 for a no-op UPDATE
        sqlx::query("UPDATE records SET content = ?, updated_at = ? WHERE id = ?")
            .bind(&patch.content)
            .bind(patch.updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::backend)?;

        let row = sqlx::query(SELECT_BY_ID)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StorageError::backend)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(StorageError::backend)?;
            return Err(StorageError::NotFound);
        };
        let record = record_from_row(&row)?;

        tx.commit().await.map_err(StorageError::backend)?;
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::backend)?;

        let result = sqlx::query("DELETE FROM records WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::backend)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(StorageError::backend)?;
            return Err(StorageError::NotFound);
        }

        tx.commit().await.map_err(StorageError::backend)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Record>, StorageError> {
        let id = id.to_string();

        let row = retry("sql_get", &RetryConfig::query(), || async {
            sqlx::query(SELECT_BY_ID)
                .bind(&id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::backend)
        })
        .await?;

        // Decode failures are permanent, so they stay outside the retry loop
        row.as_ref().map(record_from_row).transpose()
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::backend)?;
        Ok(())
    }
}
