use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{
    ids::{DocumentId, UserId},
    workflow::{DueDocumentWorkflow, DueUserReminder, WorkflowState, WorkflowUserState},
};

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Manual reminders due at `now` on open documents with an id above
    /// `after`, ordered by `(document_id, user_id)`.
    async fn due_user_reminders(
        &self,
        after: DocumentId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DueUserReminder>>;

    /// Document schedules with a reminder or auto-close due at `now`, on open
    /// documents with an id above `after`, ordered by document id.
    async fn due_document_workflows(
        &self,
        after: DocumentId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DueDocumentWorkflow>>;

    async fn find_user_state(
        &self,
        document_id: DocumentId,
        user_id: UserId,
    ) -> Result<Option<WorkflowUserState>>;

    async fn upsert_user_state(&self, state: &WorkflowUserState) -> Result<()>;

    /// Returns whether a row was removed.
    async fn delete_user_state(&self, document_id: DocumentId, user_id: UserId) -> Result<bool>;

    async fn find_document_state(&self, document_id: DocumentId) -> Result<Option<WorkflowState>>;

    /// Upserts the schedule, or deletes it when nothing remains scheduled.
    async fn save_document_state(&self, state: &WorkflowState) -> Result<()>;
}

pub type WorkflowRepositoryRef = Arc<dyn WorkflowRepository>;
