use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Row, Sqlite, sqlite::SqliteRow};

use super::util::{json_column, optional_timestamp};
use crate::db::cron_repo::{CronJobRecord, CronJobRepository};

pub struct SqliteCronJobRepository {
    pool: Pool<Sqlite>,
}

impl SqliteCronJobRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<CronJobRecord> {
        Ok(CronJobRecord {
            name: row.try_get("name")?,
            schedule: row.try_get("schedule")?,
            data: json_column(row, "data")?,
            last_started_at: optional_timestamp(row, "last_started_at")?,
            last_completed_at: optional_timestamp(row, "last_completed_at")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

#[async_trait]
impl CronJobRepository for SqliteCronJobRepository {
    async fn ensure_job(&self, name: &str, schedule: &str) -> Result<CronJobRecord> {
        sqlx::query(
            "INSERT INTO cron_jobs (name, schedule, data)
             VALUES (?, ?, '{}')
             ON CONFLICT(name) DO UPDATE SET schedule = excluded.schedule",
        )
        .bind(name)
        .bind(schedule)
        .execute(&self.pool)
        .await?;

        self.find_job(name)
            .await?
            .with_context(|| format!("cron job {name} missing after registration"))
    }

    async fn find_job(&self, name: &str) -> Result<Option<CronJobRecord>> {
        let row = sqlx::query(
            "SELECT name, schedule, data, last_started_at, last_completed_at, last_error
             FROM cron_jobs
             WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn mark_started(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE cron_jobs SET last_started_at = ? WHERE name = ?")
            .bind(at.timestamp())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_success(&self, name: &str, data: &JsonValue, at: DateTime<Utc>) -> Result<()> {
        let data = serde_json::to_string(data)?;
        sqlx::query(
            "UPDATE cron_jobs
             SET data = ?, last_completed_at = ?, last_error = NULL
             WHERE name = ?",
        )
        .bind(data)
        .bind(at.timestamp())
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&self, name: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE cron_jobs SET last_error = ? WHERE name = ?")
            .bind(error)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
