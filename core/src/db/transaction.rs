//! Unit of work for multi-row writes.
//!
//! Services begin a [`WriteTransaction`] from the [`TransactionSource`],
//! issue every write of one logical operation through it, and finish with
//! `commit` or `rollback`. Dropping an unfinished transaction rolls it back.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    access::{AccessList, AccessTarget, JobGrant, UserGrant},
    document::{DocumentActivityRecord, NewDocument, NewTemplate},
    ids::{DocumentId, GrantId, TemplateId},
    workflow::WorkflowState,
};

#[async_trait]
pub trait WriteTransaction: Send {
    /// Grants of the target as seen inside this transaction.
    async fn load_access(&mut self, target: AccessTarget) -> Result<AccessList>;

    async fn insert_job_grant(&mut self, target: AccessTarget, grant: &JobGrant) -> Result<GrantId>;

    async fn insert_user_grant(&mut self, target: AccessTarget, grant: &UserGrant)
    -> Result<GrantId>;

    async fn update_job_grant(&mut self, id: GrantId, grant: &JobGrant) -> Result<()>;

    async fn update_user_grant(&mut self, id: GrantId, grant: &UserGrant) -> Result<()>;

    async fn delete_job_grant(&mut self, id: GrantId) -> Result<()>;

    async fn delete_user_grant(&mut self, id: GrantId) -> Result<()>;

    /// Removes every grant of the target, returning how many rows went away.
    async fn clear_access(&mut self, target: AccessTarget) -> Result<u64>;

    async fn insert_template(&mut self, template: &NewTemplate) -> Result<TemplateId>;

    async fn insert_document(&mut self, document: &NewDocument) -> Result<DocumentId>;

    /// Marks an open document closed. Returns `false` if it was already closed
    /// or does not exist.
    async fn close_document(&mut self, id: DocumentId) -> Result<bool>;

    async fn record_activity(&mut self, activity: &DocumentActivityRecord) -> Result<()>;

    /// Upserts the schedule, or deletes it when nothing remains scheduled.
    async fn save_workflow_state(&mut self, state: &WorkflowState) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>>;
}

pub type TransactionSourceRef = Arc<dyn TransactionSource>;
