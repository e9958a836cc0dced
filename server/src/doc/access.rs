use dossier_core::{
    access::{
        AccessControlled, AccessDecision, AccessDelta, AccessLevel, AccessList, AccessReconciler,
        AccessResolver, AccessTarget, AccessUpdateMode, Principal, TemplateRequirementValidator,
    },
    db::{
        access_repo::AccessRepositoryRef, document_repo::DocumentRepositoryRef,
        transaction::{TransactionSourceRef, WriteTransaction},
    },
    document::{DocumentActivityKind, DocumentActivityRecord, DocumentRecord, TemplateRecord},
    ids::{TemplateId, UserId},
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// The record behind an [`AccessTarget`].
#[derive(Debug, Clone)]
pub enum TargetRecord {
    Document(DocumentRecord),
    Template(TemplateRecord),
}

impl AccessControlled for TargetRecord {
    fn creator_id(&self) -> Option<UserId> {
        match self {
            TargetRecord::Document(document) => document.creator_id,
            TargetRecord::Template(template) => template.creator_id,
        }
    }

    fn is_public(&self) -> bool {
        match self {
            TargetRecord::Document(document) => document.public,
            TargetRecord::Template(_) => false,
        }
    }
}

/// A target the principal has been cleared for, with the grants the decision
/// was made on.
#[derive(Debug, Clone)]
pub struct AuthorizedTarget {
    pub record: TargetRecord,
    pub access: AccessList,
    pub decision: AccessDecision,
}

pub struct DocumentAccessService {
    access_repo: AccessRepositoryRef,
    document_repo: DocumentRepositoryRef,
    transactions: TransactionSourceRef,
}

impl DocumentAccessService {
    pub fn new(
        access_repo: AccessRepositoryRef,
        document_repo: DocumentRepositoryRef,
        transactions: TransactionSourceRef,
    ) -> Self {
        Self {
            access_repo,
            document_repo,
            transactions,
        }
    }

    pub async fn find_target(&self, target: AccessTarget) -> AppResult<TargetRecord> {
        match target {
            AccessTarget::Document(id) => self
                .document_repo
                .find_document(id)
                .await?
                .map(TargetRecord::Document)
                .ok_or_else(|| AppError::document_not_found(id)),
            AccessTarget::Template(id) => self
                .document_repo
                .find_template(id)
                .await?
                .map(TargetRecord::Template)
                .ok_or_else(|| AppError::template_not_found(id)),
        }
    }

    pub async fn can_access(
        &self,
        principal: &Principal,
        target: AccessTarget,
        required: AccessLevel,
    ) -> AppResult<bool> {
        let record = self.find_target(target).await?;
        let access = self.access_repo.load_access(target).await?;
        Ok(AccessResolver::can_access(principal, &record, &access, required))
    }

    /// Loads the target and its grants, failing with `PermissionDenied` unless
    /// the principal holds `required`.
    pub async fn authorize(
        &self,
        principal: &Principal,
        target: AccessTarget,
        required: AccessLevel,
    ) -> AppResult<AuthorizedTarget> {
        let record = self.find_target(target).await?;
        let access = self.access_repo.load_access(target).await?;
        let decision = AccessResolver::resolve(principal, &record, &access);

        if !decision.allows(required) {
            debug!(
                %target,
                user_id = %principal.user_id,
                job = %principal.job,
                ?decision,
                %required,
                "access denied"
            );
            return Err(AppError::permission_denied(target, required));
        }

        Ok(AuthorizedTarget {
            record,
            access,
            decision,
        })
    }

    /// Grants of the target, visible to anyone who may view it.
    pub async fn get_access(
        &self,
        principal: &Principal,
        target: AccessTarget,
    ) -> AppResult<AccessList> {
        let authorized = self.authorize(principal, target, AccessLevel::View).await?;
        Ok(authorized.access)
    }

    /// Applies `access` to the target according to `mode` and returns the
    /// rows that changed. Every write, including the activity row for
    /// documents, happens in one transaction. On a document created from a
    /// template, the resulting grants must still carry every grant the
    /// template requires, or nothing is written.
    pub async fn set_access(
        &self,
        principal: &Principal,
        target: AccessTarget,
        mode: AccessUpdateMode,
        access: AccessList,
    ) -> AppResult<AccessDelta> {
        match mode {
            AccessUpdateMode::Unspecified => {
                return Err(AppError::validation("An access update mode is required.")
                    .with_name("INVALID_ACCESS_MODE"));
            }
            AccessUpdateMode::Update => access.validate()?,
            AccessUpdateMode::Delete | AccessUpdateMode::Clear => {}
        }

        let authorized = self
            .authorize(principal, target, required_to_manage(target))
            .await?;
        let requirements = self.template_requirements(&authorized.record).await?;

        let mut tx = self
            .transactions
            .begin()
            .await
            .map_err(|err| AppError::storage(target, err))?;

        let written = write_access(
            tx.as_mut(),
            principal,
            target,
            mode,
            &access,
            requirements.as_ref(),
        )
        .await;
        let delta = match written {
            Ok(delta) => delta,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(%target, error = %rollback_err, "rollback after failed access update failed");
                }
                return Err(err);
            }
        };
        tx.commit()
            .await
            .map_err(|err| AppError::storage(target, err))?;

        info!(
            %target,
            user_id = %principal.user_id,
            ?mode,
            created = delta.to_create.len(),
            updated = delta.to_update.len(),
            deleted = delta.to_delete.len(),
            "access updated"
        );
        Ok(delta)
    }

    /// Required grants of the template a document was created from.
    async fn template_requirements(
        &self,
        record: &TargetRecord,
    ) -> AppResult<Option<TemplateRequirements>> {
        let TargetRecord::Document(DocumentRecord {
            template_id: Some(template_id),
            ..
        }) = record
        else {
            return Ok(None);
        };

        let required = self
            .access_repo
            .load_access(AccessTarget::Template(*template_id))
            .await?
            .required_only();
        if required.is_empty() {
            return Ok(None);
        }
        Ok(Some(TemplateRequirements {
            template_id: *template_id,
            required,
        }))
    }
}

struct TemplateRequirements {
    template_id: TemplateId,
    required: AccessList,
}

/// Documents are managed with `Access`, templates with `Edit`.
fn required_to_manage(target: AccessTarget) -> AccessLevel {
    match target {
        AccessTarget::Document(_) => AccessLevel::Access,
        AccessTarget::Template(_) => AccessLevel::Edit,
    }
}

async fn write_access(
    tx: &mut dyn WriteTransaction,
    principal: &Principal,
    target: AccessTarget,
    mode: AccessUpdateMode,
    access: &AccessList,
    requirements: Option<&TemplateRequirements>,
) -> AppResult<AccessDelta> {
    let storage = |err: anyhow::Error| AppError::storage(target, err);
    let current = tx.load_access(target).await.map_err(storage)?;

    let (delta, remaining) = match mode {
        AccessUpdateMode::Update => (AccessReconciler::compare(&current, access)?, access.clone()),
        AccessUpdateMode::Delete => {
            let named = AccessReconciler::select_named(&current, access);
            let mut remaining = current;
            remaining.jobs.retain(|grant| !named.jobs.contains(grant));
            remaining.users.retain(|grant| !named.users.contains(grant));
            (AccessDelta::deleting(named), remaining)
        }
        AccessUpdateMode::Clear => (AccessDelta::deleting(current), AccessList::default()),
        AccessUpdateMode::Unspecified => {
            return Err(AppError::validation("An access update mode is required.")
                .with_name("INVALID_ACCESS_MODE"));
        }
    };

    if let Some(requirements) = requirements {
        TemplateRequirementValidator::check(&requirements.required, &remaining)
            .map_err(|unmet| AppError::unmet_requirements(requirements.template_id, unmet))?;
    }

    match mode {
        AccessUpdateMode::Clear => {
            tx.clear_access(target).await.map_err(storage)?;
        }
        _ => AccessReconciler::apply(tx, target, &delta)
            .await
            .map_err(storage)?,
    }

    if let AccessTarget::Document(document_id) = target {
        tx.record_activity(&DocumentActivityRecord::new(
            document_id,
            DocumentActivityKind::AccessUpdated,
            Some(principal.user_id),
            json!({
                "mode": mode,
                "created": delta.to_create.len(),
                "updated": delta.to_update.len(),
                "deleted": delta.to_delete.len(),
            }),
        ))
        .await
        .map_err(storage)?;
    }

    Ok(delta)
}
