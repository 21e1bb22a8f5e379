//! `SQLite` record store: connection setup and key/value access.

use std::fs;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::errors::StoreError;
use crate::{AppError, Result};

use super::{schema, RecordStore, StoreResult};

/// Record store persisted in a `SQLite` database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the parent directory cannot be created, or
    /// `AppError::Persistence` if the connection or schema bootstrap fails.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| AppError::Io(format!("failed to create db dir: {err}")))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        schema::bootstrap_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Open a private in-memory database.
    ///
    /// The pool is pinned to a single connection that never expires, since
    /// every `SQLite` memory connection is its own database.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the connection or schema bootstrap fails.
    pub async fn connect_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        schema::bootstrap_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl RecordStore for SqliteStore {
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = StoreResult<String>> + Send + '_>> {
        let key = key.to_owned();
        Box::pin(async move {
            let value: Option<String> =
                sqlx::query_scalar("SELECT value FROM instance_record WHERE key = ?1")
                    .bind(&key)
                    .fetch_optional(&self.pool)
                    .await?;
            value.ok_or(StoreError::NotFound(key))
        })
    }

    fn set(
        &self,
        key: &str,
        value: String,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        let key = key.to_owned();
        Box::pin(async move {
            let written_at = Utc::now().to_rfc3339();
            sqlx::query(
                "INSERT INTO instance_record (key, value, written_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                 written_at = excluded.written_at",
            )
            .bind(&key)
            .bind(&value)
            .bind(&written_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }
}
