use std::sync::Arc;

use chrono::{DateTime, Utc};
use dossier_core::{
    access::{AccessLevel, AccessTarget, Principal},
    db::workflow_repo::WorkflowRepositoryRef,
    ids::DocumentId,
    workflow::WorkflowUserState,
};
use tracing::debug;

use super::access::{DocumentAccessService, TargetRecord};
use crate::error::{AppError, AppResult};

/// Manual reminders a user sets for themselves on a document.
pub struct ReminderService {
    access: Arc<DocumentAccessService>,
    workflow_repo: WorkflowRepositoryRef,
}

impl ReminderService {
    pub fn new(access: Arc<DocumentAccessService>, workflow_repo: WorkflowRepositoryRef) -> Self {
        Self {
            access,
            workflow_repo,
        }
    }

    /// Replaces any pending reminder of the principal on the document.
    pub async fn set_reminder(
        &self,
        principal: &Principal,
        document_id: DocumentId,
        remind_at: DateTime<Utc>,
        message: Option<String>,
    ) -> AppResult<WorkflowUserState> {
        let authorized = self
            .access
            .authorize(principal, AccessTarget::Document(document_id), AccessLevel::View)
            .await?;
        if matches!(&authorized.record, TargetRecord::Document(document) if document.closed) {
            return Err(AppError::validation("Reminders cannot be set on a closed document.")
                .with_name("DOCUMENT_CLOSED"));
        }

        let state = WorkflowUserState {
            document_id,
            user_id: principal.user_id,
            manual_reminder_time: remind_at,
            manual_reminder_message: message.filter(|message| !message.trim().is_empty()),
        };
        self.workflow_repo.upsert_user_state(&state).await?;
        debug!(%document_id, user_id = %principal.user_id, %remind_at, "reminder set");
        Ok(state)
    }

    /// Returns whether a pending reminder was removed.
    pub async fn clear_reminder(
        &self,
        principal: &Principal,
        document_id: DocumentId,
    ) -> AppResult<bool> {
        self.access
            .authorize(principal, AccessTarget::Document(document_id), AccessLevel::View)
            .await?;
        let removed = self
            .workflow_repo
            .delete_user_state(document_id, principal.user_id)
            .await?;
        Ok(removed)
    }
}
