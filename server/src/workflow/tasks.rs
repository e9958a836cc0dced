use anyhow::{Context, Result};
use dossier_core::{
    db::{transaction::TransactionSourceRef, workflow_repo::WorkflowRepositoryRef},
    document::{DocumentActivityKind, DocumentActivityRecord},
    notification::{
        NotificationCenterRef, NotificationRecord, WORKFLOW_AUTO_CLOSE_KIND,
        WORKFLOW_REMINDER_KIND,
    },
    workflow::{AutoCloseDue, ReminderDue, ReminderKind, WorkflowTask},
};
use serde_json::json;
use tracing::{debug, info};

/// Carries out one due workflow item. Every item either completes fully or
/// leaves its state row untouched so the next tick picks it up again.
#[derive(Clone)]
pub struct WorkflowTaskExecutor {
    notifications: NotificationCenterRef,
    workflow_repo: WorkflowRepositoryRef,
    transactions: TransactionSourceRef,
}

impl WorkflowTaskExecutor {
    pub fn new(
        notifications: NotificationCenterRef,
        workflow_repo: WorkflowRepositoryRef,
        transactions: TransactionSourceRef,
    ) -> Self {
        Self {
            notifications,
            workflow_repo,
            transactions,
        }
    }

    pub async fn execute(&self, task: WorkflowTask) -> Result<()> {
        match task {
            WorkflowTask::ReminderDue(reminder) => self.send_reminder(reminder).await,
            WorkflowTask::AutoCloseDue(close) => self.auto_close(close).await,
        }
    }

    async fn send_reminder(&self, reminder: ReminderDue) -> Result<()> {
        let ReminderDue {
            document_id,
            document_title,
            recipient,
            message,
            kind,
        } = reminder;

        if let Some(user_id) = recipient {
            self.notifications
                .enqueue(NotificationRecord::workflow(
                    user_id,
                    WORKFLOW_REMINDER_KIND,
                    document_id,
                    &document_title,
                    &message,
                ))
                .await
                .with_context(|| format!("failed to notify user {user_id}"))?;
        }

        match kind {
            ReminderKind::Manual => {
                // Manual reminders always carry their recipient.
                if let Some(user_id) = recipient {
                    self.workflow_repo
                        .delete_user_state(document_id, user_id)
                        .await?;
                }
            }
            ReminderKind::Scheduled { next } => {
                self.workflow_repo.save_document_state(&next).await?;
            }
        }

        debug!(%document_id, user_id = ?recipient, "workflow reminder sent");
        Ok(())
    }

    async fn auto_close(&self, close: AutoCloseDue) -> Result<()> {
        let AutoCloseDue {
            document_id,
            document_title,
            creator_id,
            message,
            remaining,
        } = close;

        let mut tx = self.transactions.begin().await?;
        let result = async {
            let closed = tx.close_document(document_id).await?;
            if closed {
                tx.record_activity(&DocumentActivityRecord::new(
                    document_id,
                    DocumentActivityKind::AutoClosed,
                    None,
                    json!({ "message": message }),
                ))
                .await?;
            }
            tx.save_workflow_state(&remaining).await?;
            anyhow::Ok(closed)
        }
        .await;

        let closed = match result {
            Ok(closed) => {
                tx.commit().await?;
                closed
            }
            Err(err) => {
                tx.rollback().await?;
                return Err(err);
            }
        };

        if !closed {
            debug!(%document_id, "document already closed, schedule cleared");
            return Ok(());
        }
        info!(%document_id, "document auto-closed");

        // The close is committed at this point; a failed notification is
        // reported but cannot be retried through the cleared schedule.
        if let Some(user_id) = creator_id {
            self.notifications
                .enqueue(NotificationRecord::workflow(
                    user_id,
                    WORKFLOW_AUTO_CLOSE_KIND,
                    document_id,
                    &document_title,
                    &message,
                ))
                .await
                .with_context(|| format!("failed to notify creator {user_id} of auto-close"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        CREATOR, RecordingNotificationCenter, seed_document, seed_document_state,
        seed_user_reminder, setup_database,
    };
    use chrono::Utc;
    use dossier_core::{
        access::AccessList,
        db::Database,
        ids::{DocumentId, UserId},
        workflow::WorkflowState,
    };
    use std::sync::Arc;

    fn executor(
        database: &Database,
        notifications: Arc<RecordingNotificationCenter>,
    ) -> WorkflowTaskExecutor {
        let repositories = database.repositories();
        WorkflowTaskExecutor::new(
            notifications,
            repositories.workflow_repo(),
            repositories.transactions(),
        )
    }

    fn manual(document_id: DocumentId, user_id: i32) -> WorkflowTask {
        WorkflowTask::ReminderDue(ReminderDue {
            document_id,
            document_title: "Report".into(),
            recipient: Some(UserId::new(user_id)),
            message: "please sign".into(),
            kind: ReminderKind::Manual,
        })
    }

    #[tokio::test]
    async fn manual_reminder_notifies_then_deletes_the_state_row() -> Result<()> {
        let (_dir, database) = setup_database().await;
        let notifications = Arc::new(RecordingNotificationCenter::default());
        let document_id = seed_document(&database, None, &AccessList::default()).await;
        seed_user_reminder(&database, document_id, 5, Utc::now()).await;

        executor(&database, notifications.clone())
            .execute(manual(document_id, 5))
            .await?;

        let sent = notifications.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, WORKFLOW_REMINDER_KIND);
        assert_eq!(sent[0].payload["message"], "please sign");
        let state = database
            .repositories()
            .workflow_repo()
            .find_user_state(document_id, UserId::new(5))
            .await?;
        assert!(state.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failed_send_keeps_the_state_row() -> Result<()> {
        let (_dir, database) = setup_database().await;
        let notifications = Arc::new(RecordingNotificationCenter::default());
        notifications.fail_for(5);
        let document_id = seed_document(&database, None, &AccessList::default()).await;
        seed_user_reminder(&database, document_id, 5, Utc::now()).await;

        let result = executor(&database, notifications)
            .execute(manual(document_id, 5))
            .await;

        assert!(result.is_err());
        let state = database
            .repositories()
            .workflow_repo()
            .find_user_state(document_id, UserId::new(5))
            .await?;
        assert!(state.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn auto_close_closes_records_and_notifies_the_creator() -> Result<()> {
        let (_dir, database) = setup_database().await;
        let notifications = Arc::new(RecordingNotificationCenter::default());
        let document_id = seed_document(&database, None, &AccessList::default()).await;
        let state = WorkflowState {
            document_id,
            next_reminder_time: None,
            next_reminder_count: 1,
            auto_close_time: Some(Utc::now()),
        };
        seed_document_state(&database, state.clone()).await;

        let mut remaining = state;
        remaining.auto_close_time = None;
        executor(&database, notifications.clone())
            .execute(WorkflowTask::AutoCloseDue(AutoCloseDue {
                document_id,
                document_title: "Report".into(),
                creator_id: Some(UserId::new(CREATOR)),
                message: "stale".into(),
                remaining,
            }))
            .await?;

        let repositories = database.repositories();
        let document = repositories.document_repo().find_document(document_id).await?;
        assert!(document.is_some_and(|document| document.closed));
        let activity = repositories.document_repo().list_activity(document_id).await?;
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].kind, DocumentActivityKind::AutoClosed);
        assert_eq!(activity[0].data["message"], "stale");
        assert!(
            repositories
                .workflow_repo()
                .find_document_state(document_id)
                .await?
                .is_none()
        );
        assert_eq!(notifications.recipients(), vec![UserId::new(CREATOR)]);
        assert_eq!(notifications.sent()[0].kind, WORKFLOW_AUTO_CLOSE_KIND);
        Ok(())
    }
}
