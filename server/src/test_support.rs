#![allow(dead_code)]

use std::{collections::HashSet, sync::Arc};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dossier_core::{
    access::{AccessList, AccessTarget, JobGrant, UserGrant},
    config::AppConfig,
    db::{
        Database,
        transaction::{TransactionSource, TransactionSourceRef, WriteTransaction},
    },
    document::{DocumentActivityRecord, NewDocument, NewTemplate},
    ids::{DocumentId, GrantId, TemplateId, UserId},
    notification::{NotificationCenter, NotificationRecord},
    workflow::{WorkflowConfig, WorkflowState, WorkflowUserState},
};
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::state::{AppState, build_state};

pub(crate) const CREATOR: i32 = 1;

pub(crate) async fn setup_database() -> (TempDir, Database) {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let mut config = AppConfig::default();
    config.database_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .into_owned();

    let database = Database::connect(&config).await.expect("connect database");
    (temp_dir, database)
}

/// State wired to a fresh database and a recording notification center.
pub(crate) async fn setup_state() -> (TempDir, AppState, Arc<RecordingNotificationCenter>) {
    let (temp_dir, database) = setup_database().await;
    let notifications = Arc::new(RecordingNotificationCenter::default());
    let state = build_state(AppConfig::default(), database, notifications.clone());
    (temp_dir, state, notifications)
}

pub(crate) async fn seed_template(
    database: &Database,
    workflow: Option<WorkflowConfig>,
    access: &AccessList,
) -> TemplateId {
    let mut tx = database
        .repositories()
        .transactions()
        .begin()
        .await
        .expect("begin");
    let id = tx
        .insert_template(&NewTemplate {
            title: "Citation".into(),
            creator_id: Some(UserId::new(CREATOR)),
            creator_job: "police".into(),
            workflow,
        })
        .await
        .expect("insert template");
    let target = AccessTarget::Template(id);
    for grant in &access.jobs {
        tx.insert_job_grant(target, grant).await.expect("insert job grant");
    }
    for grant in &access.users {
        tx.insert_user_grant(target, grant).await.expect("insert user grant");
    }
    tx.commit().await.expect("commit");
    id
}

pub(crate) async fn seed_document(
    database: &Database,
    template_id: Option<TemplateId>,
    access: &AccessList,
) -> DocumentId {
    let mut tx = database
        .repositories()
        .transactions()
        .begin()
        .await
        .expect("begin");
    let id = tx
        .insert_document(&NewDocument {
            template_id,
            creator_id: Some(UserId::new(CREATOR)),
            creator_job: "police".into(),
            title: "Report".into(),
            public: false,
        })
        .await
        .expect("insert document");
    let target = AccessTarget::Document(id);
    for grant in &access.jobs {
        tx.insert_job_grant(target, grant).await.expect("insert job grant");
    }
    for grant in &access.users {
        tx.insert_user_grant(target, grant).await.expect("insert user grant");
    }
    tx.commit().await.expect("commit");
    id
}

pub(crate) async fn seed_user_reminder(
    database: &Database,
    document_id: DocumentId,
    user_id: i32,
    at: DateTime<Utc>,
) {
    database
        .repositories()
        .workflow_repo()
        .upsert_user_state(&WorkflowUserState {
            document_id,
            user_id: UserId::new(user_id),
            manual_reminder_time: at,
            manual_reminder_message: None,
        })
        .await
        .expect("upsert user state");
}

pub(crate) async fn seed_document_state(database: &Database, state: WorkflowState) {
    database
        .repositories()
        .workflow_repo()
        .save_document_state(&state)
        .await
        .expect("save document state");
}

/// Keeps enqueued notifications in memory. Enqueueing for a user listed in
/// `failing` returns an error instead.
#[derive(Default)]
pub(crate) struct RecordingNotificationCenter {
    sent: Mutex<Vec<NotificationRecord>>,
    failing: Mutex<HashSet<UserId>>,
}

impl RecordingNotificationCenter {
    pub(crate) fn fail_for(&self, user_id: i32) {
        self.failing.lock().insert(UserId::new(user_id));
    }

    pub(crate) fn recover(&self, user_id: i32) {
        self.failing.lock().remove(&UserId::new(user_id));
    }

    pub(crate) fn sent(&self) -> Vec<NotificationRecord> {
        self.sent.lock().clone()
    }

    pub(crate) fn recipients(&self) -> Vec<UserId> {
        let mut recipients: Vec<UserId> =
            self.sent.lock().iter().map(|record| record.user_id).collect();
        recipients.sort();
        recipients
    }
}

#[async_trait]
impl NotificationCenter for RecordingNotificationCenter {
    async fn enqueue(&self, notification: NotificationRecord) -> Result<()> {
        if self.failing.lock().contains(&notification.user_id) {
            return Err(anyhow!(
                "notification transport rejected user {}",
                notification.user_id
            ));
        }
        self.sent.lock().push(notification);
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId, limit: i64) -> Result<Vec<NotificationRecord>> {
        let sent = self.sent.lock();
        Ok(sent
            .iter()
            .rev()
            .filter(|record| record.user_id == user_id)
            .take(usize::try_from(limit).unwrap_or_default())
            .cloned()
            .collect())
    }

    async fn count_unread(&self, user_id: UserId) -> Result<i64> {
        let sent = self.sent.lock();
        Ok(sent
            .iter()
            .filter(|record| record.user_id == user_id && !record.read)
            .count() as i64)
    }
}

/// Where a [`FaultyTransactions`] transaction breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Every user grant insert is issued twice, so the second one trips the
    /// table's unique key.
    DuplicateUserInsert,
    /// Activity rows fail to write after every grant change went through.
    ActivityWrite,
}

/// Real SQLite transactions with one injected failure.
pub(crate) struct FaultyTransactions {
    inner: TransactionSourceRef,
    fault: Fault,
}

impl FaultyTransactions {
    pub(crate) fn new(database: &Database, fault: Fault) -> TransactionSourceRef {
        Arc::new(Self {
            inner: database.repositories().transactions(),
            fault,
        })
    }
}

#[async_trait]
impl TransactionSource for FaultyTransactions {
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>> {
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin().await?,
            fault: self.fault,
        }))
    }
}

struct FaultyTransaction {
    inner: Box<dyn WriteTransaction>,
    fault: Fault,
}

#[async_trait]
impl WriteTransaction for FaultyTransaction {
    async fn load_access(&mut self, target: AccessTarget) -> Result<AccessList> {
        self.inner.load_access(target).await
    }

    async fn insert_job_grant(&mut self, target: AccessTarget, grant: &JobGrant) -> Result<GrantId> {
        self.inner.insert_job_grant(target, grant).await
    }

    async fn insert_user_grant(
        &mut self,
        target: AccessTarget,
        grant: &UserGrant,
    ) -> Result<GrantId> {
        let id = self.inner.insert_user_grant(target, grant).await?;
        if self.fault == Fault::DuplicateUserInsert {
            self.inner.insert_user_grant(target, grant).await?;
        }
        Ok(id)
    }

    async fn update_job_grant(&mut self, id: GrantId, grant: &JobGrant) -> Result<()> {
        self.inner.update_job_grant(id, grant).await
    }

    async fn update_user_grant(&mut self, id: GrantId, grant: &UserGrant) -> Result<()> {
        self.inner.update_user_grant(id, grant).await
    }

    async fn delete_job_grant(&mut self, id: GrantId) -> Result<()> {
        self.inner.delete_job_grant(id).await
    }

    async fn delete_user_grant(&mut self, id: GrantId) -> Result<()> {
        self.inner.delete_user_grant(id).await
    }

    async fn clear_access(&mut self, target: AccessTarget) -> Result<u64> {
        self.inner.clear_access(target).await
    }

    async fn insert_template(&mut self, template: &NewTemplate) -> Result<TemplateId> {
        self.inner.insert_template(template).await
    }

    async fn insert_document(&mut self, document: &NewDocument) -> Result<DocumentId> {
        self.inner.insert_document(document).await
    }

    async fn close_document(&mut self, id: DocumentId) -> Result<bool> {
        self.inner.close_document(id).await
    }

    async fn record_activity(&mut self, activity: &DocumentActivityRecord) -> Result<()> {
        if self.fault == Fault::ActivityWrite {
            return Err(anyhow!("activity log unavailable"));
        }
        self.inner.record_activity(activity).await
    }

    async fn save_workflow_state(&mut self, state: &WorkflowState) -> Result<()> {
        self.inner.save_workflow_state(state).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}
