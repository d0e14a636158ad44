//! Database connection pool management.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::error::StorageError;

/// Connection pool manager for the embedded swarm database.
///
/// SQLite is opened in WAL mode so readers proceed while the single writer
/// holds the write lock. All writes flush before returning
/// (`synchronous=NORMAL` under WAL).
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Open (creating if missing) the database at `path`.
    pub async fn open(path: &Path, max_connections: u32, busy_timeout_ms: u64) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::ConnectionFailed(format!("create {}: {e}", parent.display())))?;
        }
        let url = format!("sqlite:{}", path.display());
        Self::connect(&url, max_connections, busy_timeout_ms).await
    }

    /// Connect to a database URL (`sqlite:...` or `sqlite::memory:`).
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        busy_timeout_ms: u64,
    ) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::ConnectionFailed(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(busy_timeout_ms))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections.max(1))
            .idle_timeout(Duration::from_secs(30))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("pool setup: {e}")))?;

        Ok(Self { pool })
    }

    /// The connection pool for query execution.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all connections; called at shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_connection() {
        let db = DatabaseConnection::connect("sqlite::memory:", 5, 5000)
            .await
            .expect("failed to create connection");
        assert!(!db.pool().is_closed());
        db.close().await;
        assert!(db.pool().is_closed());
    }

    #[tokio::test]
    async fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("swarm.db");
        let db = DatabaseConnection::open(&path, 2, 5000)
            .await
            .expect("failed to open database");
        assert!(path.parent().unwrap().exists());
        db.close().await;
    }
}
