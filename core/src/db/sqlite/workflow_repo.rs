use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite, SqliteConnection, sqlite::SqliteRow};

use super::{
    document_repo::parse_workflow,
    util::{limit, optional_timestamp, timestamp},
};
use crate::{
    db::workflow_repo::WorkflowRepository,
    ids::{DocumentId, UserId},
    workflow::{DueDocumentWorkflow, DueUserReminder, WorkflowState, WorkflowUserState},
};

pub struct SqliteWorkflowRepository {
    pool: Pool<Sqlite>,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn map_user_state(row: &SqliteRow) -> Result<WorkflowUserState> {
        Ok(WorkflowUserState {
            document_id: row.try_get("document_id")?,
            user_id: row.try_get("user_id")?,
            manual_reminder_time: timestamp(row, "manual_reminder_time")?,
            manual_reminder_message: row.try_get("manual_reminder_message")?,
        })
    }

    fn map_document_state(row: &SqliteRow) -> Result<WorkflowState> {
        Ok(WorkflowState {
            document_id: row.try_get("document_id")?,
            next_reminder_time: optional_timestamp(row, "next_reminder_time")?,
            next_reminder_count: row.try_get("next_reminder_count")?,
            auto_close_time: optional_timestamp(row, "auto_close_time")?,
        })
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    async fn due_user_reminders(
        &self,
        after: DocumentId,
        now: DateTime<Utc>,
        batch: usize,
    ) -> Result<Vec<DueUserReminder>> {
        let rows = sqlx::query(
            "SELECT s.document_id, s.user_id, s.manual_reminder_time, s.manual_reminder_message,
                    d.title, t.workflow
             FROM workflow_user_state s
             JOIN documents d ON d.id = s.document_id
             LEFT JOIN templates t ON t.id = d.template_id
             WHERE s.document_id > ?
               AND s.manual_reminder_time <= ?
               AND d.closed = 0
             ORDER BY s.document_id ASC, s.user_id ASC
             LIMIT ?",
        )
        .bind(after)
        .bind(now.timestamp())
        .bind(limit(batch))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DueUserReminder {
                    state: Self::map_user_state(row)?,
                    document_title: row.try_get("title")?,
                    workflow: parse_workflow(row.try_get("workflow")?)?,
                })
            })
            .collect()
    }

    async fn due_document_workflows(
        &self,
        after: DocumentId,
        now: DateTime<Utc>,
        batch: usize,
    ) -> Result<Vec<DueDocumentWorkflow>> {
        let now = now.timestamp();
        let rows = sqlx::query(
            "SELECT w.document_id, w.next_reminder_time, w.next_reminder_count, w.auto_close_time,
                    d.title, d.creator_id, t.workflow
             FROM document_workflow_state w
             JOIN documents d ON d.id = w.document_id
             LEFT JOIN templates t ON t.id = d.template_id
             WHERE w.document_id > ?
               AND d.closed = 0
               AND (w.next_reminder_time <= ? OR w.auto_close_time <= ?)
             ORDER BY w.document_id ASC
             LIMIT ?",
        )
        .bind(after)
        .bind(now)
        .bind(now)
        .bind(limit(batch))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DueDocumentWorkflow {
                    state: Self::map_document_state(row)?,
                    document_title: row.try_get("title")?,
                    creator_id: row.try_get("creator_id")?,
                    workflow: parse_workflow(row.try_get("workflow")?)?,
                })
            })
            .collect()
    }

    async fn find_user_state(
        &self,
        document_id: DocumentId,
        user_id: UserId,
    ) -> Result<Option<WorkflowUserState>> {
        let row = sqlx::query(
            "SELECT document_id, user_id, manual_reminder_time, manual_reminder_message
             FROM workflow_user_state
             WHERE document_id = ? AND user_id = ?",
        )
        .bind(document_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_user_state).transpose()
    }

    async fn upsert_user_state(&self, state: &WorkflowUserState) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflow_user_state
                 (document_id, user_id, manual_reminder_time, manual_reminder_message)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(document_id, user_id) DO UPDATE SET
                 manual_reminder_time = excluded.manual_reminder_time,
                 manual_reminder_message = excluded.manual_reminder_message",
        )
        .bind(state.document_id)
        .bind(state.user_id)
        .bind(state.manual_reminder_time.timestamp())
        .bind(state.manual_reminder_message.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_user_state(&self, document_id: DocumentId, user_id: UserId) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM workflow_user_state WHERE document_id = ? AND user_id = ?")
                .bind(document_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_document_state(&self, document_id: DocumentId) -> Result<Option<WorkflowState>> {
        let row = sqlx::query(
            "SELECT document_id, next_reminder_time, next_reminder_count, auto_close_time
             FROM document_workflow_state
             WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_document_state).transpose()
    }

    async fn save_document_state(&self, state: &WorkflowState) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        save_document_state(&mut conn, state).await
    }
}

pub(crate) async fn save_document_state(
    conn: &mut SqliteConnection,
    state: &WorkflowState,
) -> Result<()> {
    if state.is_idle() {
        sqlx::query("DELETE FROM document_workflow_state WHERE document_id = ?")
            .bind(state.document_id)
            .execute(&mut *conn)
            .await?;
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO document_workflow_state
             (document_id, next_reminder_time, next_reminder_count, auto_close_time)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(document_id) DO UPDATE SET
             next_reminder_time = excluded.next_reminder_time,
             next_reminder_count = excluded.next_reminder_count,
             auto_close_time = excluded.auto_close_time",
    )
    .bind(state.document_id)
    .bind(state.next_reminder_time.map(|time| time.timestamp()))
    .bind(state.next_reminder_count)
    .bind(state.auto_close_time.map(|time| time.timestamp()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}
