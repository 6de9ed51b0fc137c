//! # SQLite Pool
//!
//! Pool and migrations for the engine's own persisted state (sync-wave
//! history). Library entities live behind [`crate::store`] instead.
//!
//! Connections run in WAL mode with foreign keys on. Batch workers commit
//! concurrently, so a busy timeout lets a writer wait for the lock instead of
//! failing with `SQLITE_BUSY`.
//!
//! ```rust,ignore
//! use core_library::db::{connect, DatabaseConfig};
//!
//! let pool = connect(DatabaseConfig::file("library-sync.db")).await?;
//! let waves = SqliteSyncWaveRepository::new(pool);
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    options: SqliteConnectOptions,
    label: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    /// Database file, created on first use
    pub fn file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            options: SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            label: path.display().to_string(),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Private in-memory database
    ///
    /// Every connection to `:memory:` opens a fresh database, so the pool holds
    /// exactly one connection for its whole life.
    pub fn in_memory() -> Self {
        Self {
            options: SqliteConnectOptions::new().in_memory(true),
            label: ":memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn is_memory(&self) -> bool {
        self.label == ":memory:"
    }
}

/// Open the pool and apply pending migrations
///
/// # Errors
///
/// Fails when the file cannot be opened or a migration does not apply.
pub async fn connect(config: DatabaseConfig) -> Result<SqlitePool> {
    info!(database = %config.label, "Opening database");

    let options = config
        .options
        .clone()
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout);
    if config.is_memory() {
        pool_options = pool_options
            .min_connections(1)
            .max_lifetime(None)
            .idle_timeout(None);
    }

    let pool = pool_options.connect_with(options).await.map_err(|e| {
        warn!(database = %config.label, error = %e, "Failed to open database");
        LibraryError::Database(e)
    })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| LibraryError::Migration(e.to_string()))?;
    debug!(database = %config.label, "Migrations applied");

    Ok(pool)
}

/// Migrated in-memory pool for tests
pub async fn create_test_pool() -> Result<SqlitePool> {
    connect(DatabaseConfig::in_memory()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_create_sync_waves_table() {
        let pool = create_test_pool().await.unwrap();

        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='sync_waves'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables.0, 1);

        let fk: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fk.0, 1);
    }

    #[tokio::test]
    async fn test_in_memory_pool_keeps_data_between_queries() {
        let pool = create_test_pool().await.unwrap();

        sqlx::query("CREATE TABLE scratch (value INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO scratch VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scratch")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_file_database_uses_wal_and_reopens() {
        let path = std::env::temp_dir().join(format!(
            "library-sync-db-test-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let pool = connect(DatabaseConfig::file(&path)).await.unwrap();
        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");
        pool.close().await;

        // Migrations are idempotent across restarts
        let reopened = connect(DatabaseConfig::file(&path)).await.unwrap();
        reopened.close().await;

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
    }

    #[test]
    fn test_max_connections_floor() {
        assert_eq!(DatabaseConfig::in_memory().max_connections(0).max_connections, 1);
    }
}
