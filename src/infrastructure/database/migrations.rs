//! Embedded schema migration management.

use sqlx::SqlitePool;

use crate::domain::error::StorageError;

/// One versioned schema change.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: String,
    pub sql: String,
}

/// Applies embedded migrations in version order, recording progress in a
/// `schema_migrations` table. Safe to run repeatedly.
pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply all pending migrations; returns how many ran.
    pub async fn run_embedded_migrations(
        &self,
        migrations: Vec<Migration>,
    ) -> Result<usize, StorageError> {
        self.ensure_migrations_table().await?;
        let current_version = self.get_current_version().await?;
        let pending: Vec<_> = migrations
            .into_iter()
            .filter(|m| m.version > current_version)
            .collect();

        if pending.is_empty() {
            return Ok(0);
        }

        for migration in &pending {
            self.apply_migration(migration).await?;
        }

        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed {
            version: 0,
            message: e.to_string(),
        })?;
        Ok(())
    }

    pub async fn get_current_version(&self) -> Result<i64, StorageError> {
        let result: Option<(i64,)> =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::MigrationFailed {
                    version: 0,
                    message: e.to_string(),
                })?;
        Ok(result.map_or(0, |(v,)| v))
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<(), StorageError> {
        sqlx::raw_sql(&migration.sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::MigrationFailed {
                version: migration.version,
                message: e.to_string(),
            })?;

        sqlx::query("INSERT OR IGNORE INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(&migration.description)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::MigrationFailed {
                version: migration.version,
                message: e.to_string(),
            })?;

        Ok(())
    }
}

/// All migrations shipped with this crate, oldest first.
pub fn all_embedded_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial swarm memory schema".to_string(),
        sql: include_str!("../../../migrations/001_initial_schema.sql").to_string(),
    }]
}
