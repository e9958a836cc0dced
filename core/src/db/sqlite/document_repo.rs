use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite, sqlite::SqliteRow};

use super::util::{json_column, timestamp};
use crate::{
    db::document_repo::DocumentRepository,
    document::{DocumentActivityKind, DocumentActivityRecord, DocumentRecord, TemplateRecord},
    ids::{DocumentId, TemplateId},
    workflow::WorkflowConfig,
};

pub struct SqliteDocumentRepository {
    pool: Pool<Sqlite>,
}

impl SqliteDocumentRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn map_document(row: &SqliteRow) -> Result<DocumentRecord> {
        Ok(DocumentRecord {
            id: row.try_get("id")?,
            template_id: row.try_get("template_id")?,
            creator_id: row.try_get("creator_id")?,
            creator_job: row.try_get("creator_job")?,
            title: row.try_get("title")?,
            public: row.try_get("public")?,
            closed: row.try_get("closed")?,
            created_at: timestamp(row, "created_at")?,
            updated_at: timestamp(row, "updated_at")?,
        })
    }

    fn map_template(row: &SqliteRow) -> Result<TemplateRecord> {
        Ok(TemplateRecord {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            creator_id: row.try_get("creator_id")?,
            creator_job: row.try_get("creator_job")?,
            workflow: parse_workflow(row.try_get("workflow")?)?,
            created_at: timestamp(row, "created_at")?,
        })
    }

    fn map_activity(row: &SqliteRow) -> Result<DocumentActivityRecord> {
        let kind: String = row.try_get("kind")?;
        Ok(DocumentActivityRecord {
            document_id: row.try_get("document_id")?,
            kind: DocumentActivityKind::parse(&kind)
                .with_context(|| format!("unknown document activity kind: {kind}"))?,
            creator_id: row.try_get("creator_id")?,
            data: json_column(row, "data")?,
            created_at: timestamp(row, "created_at")?,
        })
    }
}

pub(crate) fn parse_workflow(raw: Option<String>) -> Result<Option<WorkflowConfig>> {
    raw.map(|raw| serde_json::from_str(&raw).context("invalid template workflow config"))
        .transpose()
}

#[async_trait]
impl DocumentRepository for SqliteDocumentRepository {
    async fn find_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT id, template_id, creator_id, creator_job, title, public, closed,
                    created_at, updated_at
             FROM documents
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_document).transpose()
    }

    async fn find_template(&self, id: TemplateId) -> Result<Option<TemplateRecord>> {
        let row = sqlx::query(
            "SELECT id, title, creator_id, creator_job, workflow, created_at
             FROM templates
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_template).transpose()
    }

    async fn list_activity(&self, document_id: DocumentId) -> Result<Vec<DocumentActivityRecord>> {
        let rows = sqlx::query(
            "SELECT document_id, kind, creator_id, data, created_at
             FROM document_activity
             WHERE document_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_activity).collect()
    }
}
