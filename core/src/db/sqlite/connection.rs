use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use sqlx::{
    Pool, Sqlite,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};

pub type SqlitePool = Pool<Sqlite>;

static MIGRATOR: Migrator = sqlx::migrate!("../server/migrations/sqlite");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// WAL journal with foreign keys enforced; grants and workflow rows cascade
/// with their document.
fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
}

pub async fn create_pool(path: &Path, max_connections: u32) -> Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(connect_options(path))
        .await
        .with_context(|| format!("failed to open sqlite database {}", path.display()))
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to apply sqlite migrations")?;
    tracing::debug!(migrations = MIGRATOR.iter().count(), "sqlite schema up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_enforces_foreign_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = create_pool(&dir.path().join("fk.db"), 0).await?;
        run_migrations(&pool).await?;

        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await?;
        assert_eq!(enabled, 1);

        let orphan = sqlx::query(
            "INSERT INTO workflow_user_state (document_id, user_id, manual_reminder_time)
             VALUES (999, 1, 0)",
        )
        .execute(&pool)
        .await;
        assert!(orphan.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn migrations_are_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = create_pool(&dir.path().join("twice.db"), 1).await?;

        run_migrations(&pool).await?;
        run_migrations(&pool).await?;
        Ok(())
    }
}
