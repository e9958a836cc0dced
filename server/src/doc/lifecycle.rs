use std::sync::Arc;

use chrono::Utc;
use dossier_core::{
    access::{
        AccessDelta, AccessLevel, AccessList, AccessReconciler, AccessTarget, Principal,
        TemplateRequirementValidator,
    },
    db::transaction::{TransactionSourceRef, WriteTransaction},
    document::{DocumentActivityKind, DocumentActivityRecord, NewDocument, NewTemplate},
    ids::{DocumentId, TemplateId},
    workflow::WorkflowConfig,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::access::{DocumentAccessService, TargetRecord};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateInput {
    pub title: String,
    #[serde(default)]
    pub workflow: Option<WorkflowConfig>,
    #[serde(default)]
    pub access: AccessList,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentInput {
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    pub title: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub access: AccessList,
}

/// Creates templates and documents together with their grants.
pub struct DocumentLifecycleService {
    access: Arc<DocumentAccessService>,
    transactions: TransactionSourceRef,
}

impl DocumentLifecycleService {
    pub fn new(access: Arc<DocumentAccessService>, transactions: TransactionSourceRef) -> Self {
        Self {
            access,
            transactions,
        }
    }

    pub async fn create_template(
        &self,
        principal: &Principal,
        input: CreateTemplateInput,
    ) -> AppResult<TemplateId> {
        input.access.validate()?;

        let mut tx = self.transactions.begin().await?;
        let template = NewTemplate {
            title: input.title,
            creator_id: Some(principal.user_id),
            creator_job: principal.job.clone(),
            workflow: input.workflow,
        };
        let written = async {
            let id = tx.insert_template(&template).await?;
            let target = AccessTarget::Template(id);
            AccessReconciler::apply(tx.as_mut(), target, &AccessDelta::creating(&input.access))
                .await
                .map_err(|err| AppError::storage(target, err))?;
            AppResult::Ok(id)
        }
        .await;

        let id = finish(tx, written).await?;
        info!(template_id = %id, user_id = %principal.user_id, "template created");
        Ok(id)
    }

    /// Creates a document, optionally from a template. A referenced template
    /// must be visible to the principal and its required grants must appear
    /// verbatim in `input.access`; both are checked before anything is
    /// written.
    pub async fn create_document(
        &self,
        principal: &Principal,
        input: CreateDocumentInput,
    ) -> AppResult<DocumentId> {
        input.access.validate()?;

        let workflow = match input.template_id {
            Some(template_id) => {
                let template = self
                    .access
                    .authorize(principal, AccessTarget::Template(template_id), AccessLevel::View)
                    .await?;
                TemplateRequirementValidator::check(&template.access, &input.access)
                    .map_err(|unmet| AppError::unmet_requirements(template_id, unmet))?;
                match template.record {
                    TargetRecord::Template(record) => record.workflow,
                    TargetRecord::Document(_) => None,
                }
            }
            None => None,
        };

        let now = Utc::now();
        let document = NewDocument {
            template_id: input.template_id,
            creator_id: Some(principal.user_id),
            creator_job: principal.job.clone(),
            title: input.title,
            public: input.public,
        };

        let mut tx = self.transactions.begin().await?;
        let written = async {
            let id = tx.insert_document(&document).await?;
            let target = AccessTarget::Document(id);
            AccessReconciler::apply(tx.as_mut(), target, &AccessDelta::creating(&input.access))
                .await
                .map_err(|err| AppError::storage(target, err))?;
            if let Some(state) = workflow
                .as_ref()
                .and_then(|workflow| workflow.initial_state(id, now))
            {
                tx.save_workflow_state(&state).await?;
            }
            tx.record_activity(&DocumentActivityRecord::new(
                id,
                DocumentActivityKind::Created,
                Some(principal.user_id),
                json!({
                    "templateId": document.template_id,
                    "grants": input.access.len(),
                }),
            ))
            .await?;
            AppResult::Ok(id)
        }
        .await;

        let id = finish(tx, written).await?;
        info!(
            document_id = %id,
            template_id = ?document.template_id,
            user_id = %principal.user_id,
            "document created"
        );
        Ok(id)
    }
}

/// Commits on success, rolls back otherwise.
async fn finish<T>(tx: Box<dyn WriteTransaction>, written: AppResult<T>) -> AppResult<T> {
    match written {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback after failed create failed");
            }
            Err(err)
        }
    }
}
