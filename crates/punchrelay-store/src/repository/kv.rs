//! # Key-Value Repository
//!
//! Reads and upserts rows of the `kv_store` table.
//!
//! ```text
//! kv_store
//! ┌──────────────────┬──────────────────────────────┬─────────────────────┐
//! │ key (PK)         │ value                        │ updated_at          │
//! ├──────────────────┼──────────────────────────────┼─────────────────────┤
//! │ device_config    │ {"ip":"192.168.1.201",...}   │ 2025-01-10T09:00:00Z│
//! │ invalid_user_ids │ {"user_ids":[...],...}       │ 2025-01-10T09:05:12Z│
//! └──────────────────┴──────────────────────────────┴─────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::StoreResult;

/// Repository for key-value documents.
#[derive(Debug, Clone)]
pub struct KvRepository {
    pool: SqlitePool,
}

impl KvRepository {
    /// Creates a new KvRepository.
    pub fn new(pool: SqlitePool) -> Self {
        KvRepository { pool }
    }

    /// Returns the value stored under `key`, if any.
    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    /// Inserts or replaces the value stored under `key`.
    pub async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();

        debug!(key = %key, bytes = value.len(), "Writing store value");

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
