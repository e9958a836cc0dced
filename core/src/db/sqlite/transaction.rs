use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Sqlite, Transaction};

use super::{
    access_repo::load_access,
    util::{bool_to_i64, target_columns},
    workflow_repo::save_document_state,
};
use crate::{
    access::{AccessList, AccessTarget, JobGrant, UserGrant},
    db::transaction::{TransactionSource, WriteTransaction},
    document::{DocumentActivityRecord, NewDocument, NewTemplate},
    ids::{DocumentId, GrantId, TemplateId},
    workflow::WorkflowState,
};

pub struct SqliteTransactionSource {
    pool: Pool<Sqlite>,
}

impl SqliteTransactionSource {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionSource for SqliteTransactionSource {
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("failed to begin sqlite transaction")?;
        Ok(Box::new(SqliteWriteTransaction { tx }))
    }
}

pub struct SqliteWriteTransaction {
    tx: Transaction<'static, Sqlite>,
}

fn row_id<T: From<u64>>(rowid: i64) -> Result<T> {
    let id = u64::try_from(rowid).with_context(|| format!("negative row id {rowid}"))?;
    Ok(T::from(id))
}

#[async_trait]
impl WriteTransaction for SqliteWriteTransaction {
    async fn load_access(&mut self, target: AccessTarget) -> Result<AccessList> {
        load_access(&mut *self.tx, target).await
    }

    async fn insert_job_grant(&mut self, target: AccessTarget, grant: &JobGrant) -> Result<GrantId> {
        let (kind, id) = target_columns(target)?;
        let result = sqlx::query(
            "INSERT INTO job_access (target_kind, target_id, job, minimum_grade, access, required)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(kind)
        .bind(id)
        .bind(&grant.job)
        .bind(grant.minimum_grade)
        .bind(grant.level)
        .bind(bool_to_i64(grant.required))
        .execute(&mut *self.tx)
        .await?;

        row_id(result.last_insert_rowid())
    }

    async fn insert_user_grant(
        &mut self,
        target: AccessTarget,
        grant: &UserGrant,
    ) -> Result<GrantId> {
        let (kind, id) = target_columns(target)?;
        let result = sqlx::query(
            "INSERT INTO user_access (target_kind, target_id, user_id, access, required)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(kind)
        .bind(id)
        .bind(grant.user_id)
        .bind(grant.level)
        .bind(bool_to_i64(grant.required))
        .execute(&mut *self.tx)
        .await?;

        row_id(result.last_insert_rowid())
    }

    async fn update_job_grant(&mut self, id: GrantId, grant: &JobGrant) -> Result<()> {
        sqlx::query("UPDATE job_access SET access = ?, required = ? WHERE id = ?")
            .bind(grant.level)
            .bind(bool_to_i64(grant.required))
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_user_grant(&mut self, id: GrantId, grant: &UserGrant) -> Result<()> {
        sqlx::query("UPDATE user_access SET access = ?, required = ? WHERE id = ?")
            .bind(grant.level)
            .bind(bool_to_i64(grant.required))
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_job_grant(&mut self, id: GrantId) -> Result<()> {
        sqlx::query("DELETE FROM job_access WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_user_grant(&mut self, id: GrantId) -> Result<()> {
        sqlx::query("DELETE FROM user_access WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn clear_access(&mut self, target: AccessTarget) -> Result<u64> {
        let (kind, id) = target_columns(target)?;
        let jobs = sqlx::query("DELETE FROM job_access WHERE target_kind = ? AND target_id = ?")
            .bind(kind)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        let users = sqlx::query("DELETE FROM user_access WHERE target_kind = ? AND target_id = ?")
            .bind(kind)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(jobs.rows_affected() + users.rows_affected())
    }

    async fn insert_template(&mut self, template: &NewTemplate) -> Result<TemplateId> {
        let workflow = template
            .workflow
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = sqlx::query(
            "INSERT INTO templates (title, creator_id, creator_job, workflow, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&template.title)
        .bind(template.creator_id)
        .bind(&template.creator_job)
        .bind(workflow)
        .bind(Utc::now().timestamp())
        .execute(&mut *self.tx)
        .await?;

        row_id(result.last_insert_rowid())
    }

    async fn insert_document(&mut self, document: &NewDocument) -> Result<DocumentId> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO documents
                 (template_id, creator_id, creator_job, title, public, closed, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(document.template_id)
        .bind(document.creator_id)
        .bind(&document.creator_job)
        .bind(&document.title)
        .bind(bool_to_i64(document.public))
        .bind(now)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        row_id(result.last_insert_rowid())
    }

    async fn close_document(&mut self, id: DocumentId) -> Result<bool> {
        let result =
            sqlx::query("UPDATE documents SET closed = 1, updated_at = ? WHERE id = ? AND closed = 0")
                .bind(Utc::now().timestamp())
                .bind(id)
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        // Pending manual reminders die with the document.
        sqlx::query("DELETE FROM workflow_user_state WHERE document_id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(true)
    }

    async fn record_activity(&mut self, activity: &DocumentActivityRecord) -> Result<()> {
        let data = serde_json::to_string(&activity.data)?;
        sqlx::query(
            "INSERT INTO document_activity (document_id, kind, creator_id, data, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(activity.document_id)
        .bind(activity.kind.as_str())
        .bind(activity.creator_id)
        .bind(data)
        .bind(activity.created_at.timestamp())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn save_workflow_state(&mut self, state: &WorkflowState) -> Result<()> {
        save_document_state(&mut *self.tx, state).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("failed to commit sqlite transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("failed to roll back sqlite transaction")
    }
}
