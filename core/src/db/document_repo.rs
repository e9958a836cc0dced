use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    document::{DocumentActivityRecord, DocumentRecord, TemplateRecord},
    ids::{DocumentId, TemplateId},
};

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn find_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>>;

    async fn find_template(&self, id: TemplateId) -> Result<Option<TemplateRecord>>;

    /// Activity of a document, oldest first.
    async fn list_activity(&self, document_id: DocumentId) -> Result<Vec<DocumentActivityRecord>>;
}

pub type DocumentRepositoryRef = Arc<dyn DocumentRepository>;
