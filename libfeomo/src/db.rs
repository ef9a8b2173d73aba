//! Local SQLite cache
//!
//! Holds the generic key/value table that backs the mobile storage mirror
//! and a denormalized copy of recent timelines for instant cold starts. The
//! timeline tables are independent of the live stores: nothing here is read
//! back unless a caller asks for it.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{DbError, Result, StorageError};
use crate::platform::KeyValueBackend;
use crate::types::Status;

/// Maximum number of statuses persisted per timeline
pub const TIMELINE_LIMIT: usize = 50;

/// A timeline restored from the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedTimeline {
    pub statuses: Vec<Status>,
    pub next_token: Option<String>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file at `db_path` and run migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::Io)?;
        }

        // Forward slashes work on both Windows and Unix; mode=rwc creates the file
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(DbError::Sqlx)?
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(DbError::Sqlx)?;

        Self::migrate(pool).await
    }

    /// Private in-memory database.
    ///
    /// Every SQLite connection to `:memory:` is a separate database, so the
    /// pool is pinned to a single connection that never expires.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::Sqlx)?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::Migration)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every connection, shared with all clones of this handle.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ------------------------------------------------------------------
    // Key/value table
    // ------------------------------------------------------------------

    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        Ok(row.and_then(|r| r.get::<Option<String>, _>("value")))
    }

    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        Ok(())
    }

    pub async fn delete_value(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        Ok(())
    }

    /// Every key with a non-null value.
    pub async fn all_values(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM kv_store WHERE value IS NOT NULL")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("key"), r.get("value")))
            .collect())
    }

    // ------------------------------------------------------------------
    // Timeline cache
    // ------------------------------------------------------------------

    /// Replace the cached membership of timeline `name` with the first
    /// [`TIMELINE_LIMIT`] of `statuses` and record its cursor.
    ///
    /// Status payloads are upserted, so a status shared by several timelines
    /// is stored once. All writes happen in one transaction; on failure
    /// nothing is changed.
    pub async fn save_timeline(
        &self,
        name: &str,
        statuses: &[Status],
        next_token: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::Sqlx)?;

        sqlx::query("DELETE FROM timeline_cache WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;

        for (position, status) in statuses.iter().take(TIMELINE_LIMIT).enumerate() {
            let payload = serde_json::to_string(status)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO status_cache (id, payload, updated_at)
                VALUES (?, ?, strftime('%s','now'))
                ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
                "#,
            )
            .bind(&status.id)
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;

            sqlx::query("INSERT INTO timeline_cache (name, position, status_id) VALUES (?, ?, ?)")
                .bind(name)
                .bind(position as i64)
                .bind(&status.id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::Sqlx)?;
        }

        sqlx::query(
            r#"
            INSERT INTO timeline_meta (name, next_token, updated_at)
            VALUES (?, ?, strftime('%s','now'))
            ON CONFLICT(name) DO UPDATE SET next_token = excluded.next_token, updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(next_token)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Sqlx)?;

        // Returning early above drops `tx`, which rolls it back
        tx.commit().await.map_err(DbError::Sqlx)?;

        tracing::debug!(
            timeline = %name,
            count = statuses.len().min(TIMELINE_LIMIT),
            "Saved timeline cache"
        );
        Ok(())
    }

    /// Load timeline `name` in saved order.
    ///
    /// Members whose payload is missing or fails to deserialize are skipped.
    pub async fn load_timeline(&self, name: &str) -> Result<CachedTimeline> {
        let rows = sqlx::query(
            r#"
            SELECT t.status_id, s.payload
            FROM timeline_cache t
            LEFT JOIN status_cache s ON s.id = t.status_id
            WHERE t.name = ?
            ORDER BY t.position ASC
            LIMIT ?
            "#,
        )
        .bind(name)
        .bind(TIMELINE_LIMIT as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        let mut statuses = Vec::with_capacity(rows.len());
        for row in rows {
            let status_id: String = row.get("status_id");
            let Some(payload) = row.get::<Option<String>, _>("payload") else {
                tracing::warn!(timeline = %name, status_id = %status_id, "Cached status payload missing");
                continue;
            };

            match serde_json::from_str::<Status>(&payload) {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    tracing::warn!(
                        timeline = %name,
                        status_id = %status_id,
                        error = %e,
                        "Failed to parse cached status"
                    );
                }
            }
        }

        let next_token = sqlx::query("SELECT next_token FROM timeline_meta WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Sqlx)?
            .and_then(|r| r.get::<Option<String>, _>("next_token"));

        Ok(CachedTimeline {
            statuses,
            next_token,
        })
    }

    /// Remove the membership and cursor of timeline `name`. Status payloads
    /// are left in place for other timelines.
    pub async fn clear_timeline(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::Sqlx)?;

        sqlx::query("DELETE FROM timeline_cache WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;
        sqlx::query("DELETE FROM timeline_meta WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;

        tx.commit().await.map_err(DbError::Sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueBackend for Database {
    async fn load_all(&self) -> std::result::Result<Vec<(String, String)>, StorageError> {
        self.all_values()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn put(&self, key: &str, value: &str) -> std::result::Result<(), StorageError> {
        self.set_value(key, value)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), StorageError> {
        self.delete_value(key)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn backend_name(&self) -> &str {
        "sqlite"
    }
}
