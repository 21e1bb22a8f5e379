//! `SQLite` schema bootstrap logic.
//!
//! The table definition uses `CREATE TABLE IF NOT EXISTS`, so it is safe
//! to re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply the record table definition to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Persistence` if the DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS instance_record (
    key         TEXT PRIMARY KEY NOT NULL,
    value       TEXT NOT NULL,
    written_at  TEXT NOT NULL
);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
