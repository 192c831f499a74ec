//! SQLite pool setup and schema migration.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

/// Bundled schema. Idempotent (`CREATE ... IF NOT EXISTS`).
pub const SCHEMA: &str = include_str!("../migrations/001_schema.sql");

/// Pool size for file-backed databases.
const MAX_CONNECTIONS: u32 = 4;

/// Open (creating if needed) the database at `path` and apply the schema.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or the schema fails to apply.
pub async fn open(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(opts)
        .await?;
    migrate(&pool).await?;
    info!(path = %path.display(), "database opened");
    Ok(pool)
}

/// Apply the bundled schema to an existing pool.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
