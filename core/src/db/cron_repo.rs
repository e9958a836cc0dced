use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Persisted state of one registered cron job.
#[derive(Debug, Clone, PartialEq)]
pub struct CronJobRecord {
    pub name: String,
    pub schedule: String,
    /// Handler-owned payload carried from one run to the next.
    pub data: JsonValue,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[async_trait]
pub trait CronJobRepository: Send + Sync {
    /// Inserts the job with an empty payload unless it already exists, and
    /// refreshes its schedule. Returns the stored row.
    async fn ensure_job(&self, name: &str, schedule: &str) -> Result<CronJobRecord>;

    async fn find_job(&self, name: &str) -> Result<Option<CronJobRecord>>;

    async fn mark_started(&self, name: &str, at: DateTime<Utc>) -> Result<()>;

    /// Stores the handler's new payload and clears the last error.
    async fn record_success(&self, name: &str, data: &JsonValue, at: DateTime<Utc>) -> Result<()>;

    /// Keeps the previous payload and records the failure message.
    async fn record_failure(&self, name: &str, error: &str) -> Result<()>;
}

pub type CronJobRepositoryRef = Arc<dyn CronJobRepository>;
