use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use dossier_core::{
    config::WorkflowSettings,
    db::workflow_repo::WorkflowRepositoryRef,
    ids::DocumentId,
    workflow::{WorkflowCronData, WorkflowTask},
};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::tasks::WorkflowTaskExecutor;
use crate::{
    cron::{CronHandler, CronHandlerRef, CronSchedule, CronScheduler},
    error::AppError,
    utils::pool::{PoolClosed, TaskPool},
};

pub const USER_REMINDERS_JOB: &str = "workflow.user_reminders";
pub const DOCUMENT_STATES_JOB: &str = "workflow.document_states";

/// Outcome of one drained batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: usize,
    pub failed: usize,
    /// Documents whose work failed or was never handed to a worker.
    pub unfinished: Vec<DocumentId>,
}

/// Fetch, dispatch and drain for both workflow jobs.
pub struct WorkflowRunner {
    workflow_repo: WorkflowRepositoryRef,
    executor: WorkflowTaskExecutor,
    settings: WorkflowSettings,
}

impl WorkflowRunner {
    pub fn new(
        workflow_repo: WorkflowRepositoryRef,
        executor: WorkflowTaskExecutor,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            workflow_repo,
            executor,
            settings,
        }
    }

    /// One tick over pending manual reminders.
    pub async fn run_user_reminders(
        &self,
        cursor: WorkflowCronData,
        cancel: &CancellationToken,
    ) -> Result<WorkflowCronData> {
        let batch = self.settings.batch_size;
        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(
                    job = USER_REMINDERS_JOB,
                    cursor = cursor.last_doc_id,
                    "workflow tick cancelled before fetch"
                );
                return Ok(cursor);
            }
            rows = self.workflow_repo.due_user_reminders(cursor.after(), Utc::now(), batch) => {
                rows.context("failed to fetch due user reminders")?
            }
        };

        let fetched: Vec<DocumentId> = rows.iter().map(|row| row.state.document_id).collect();
        let tasks = rows.into_iter().map(|row| row.into_task()).collect();
        let report = self.drain(tasks, cancel).await;

        let next = WorkflowCronData::advance(&fetched, &report.unfinished, batch);
        info!(
            job = USER_REMINDERS_JOB,
            cursor = cursor.last_doc_id,
            next_cursor = next.last_doc_id,
            fetched = fetched.len(),
            dispatched = report.dispatched,
            failed = report.failed,
            "workflow tick finished"
        );
        Ok(next)
    }

    /// One tick over document schedules: scheduled reminders and auto-close.
    pub async fn run_document_states(
        &self,
        cursor: WorkflowCronData,
        cancel: &CancellationToken,
    ) -> Result<WorkflowCronData> {
        let batch = self.settings.batch_size;
        let now = Utc::now();
        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(
                    job = DOCUMENT_STATES_JOB,
                    cursor = cursor.last_doc_id,
                    "workflow tick cancelled before fetch"
                );
                return Ok(cursor);
            }
            rows = self.workflow_repo.due_document_workflows(cursor.after(), now, batch) => {
                rows.context("failed to fetch due document workflows")?
            }
        };

        let fetched: Vec<DocumentId> = rows.iter().map(|row| row.state.document_id).collect();
        let tasks = rows
            .into_iter()
            .filter_map(|row| row.into_task(now))
            .collect();
        let report = self.drain(tasks, cancel).await;

        let next = WorkflowCronData::advance(&fetched, &report.unfinished, batch);
        info!(
            job = DOCUMENT_STATES_JOB,
            cursor = cursor.last_doc_id,
            next_cursor = next.last_doc_id,
            fetched = fetched.len(),
            dispatched = report.dispatched,
            failed = report.failed,
            "workflow tick finished"
        );
        Ok(next)
    }

    /// Feeds `tasks` in order to a fresh worker pool and waits until every
    /// dispatched item has finished. Cancellation stops dispatch only;
    /// items already handed to a worker run to completion.
    pub async fn drain(&self, tasks: Vec<WorkflowTask>, cancel: &CancellationToken) -> TickReport {
        let executor = self.executor.clone();
        let pool = TaskPool::new(
            self.settings.workers,
            self.settings.queue_capacity,
            move |task: WorkflowTask| {
                let executor = executor.clone();
                async move {
                    let document_id = task.document_id();
                    let kind = task.kind();
                    let outcome = executor
                        .execute(task)
                        .await
                        .map_err(|err| AppError::workflow_item(document_id, kind, err));
                    (document_id, outcome)
                }
            },
        );

        let mut report = TickReport::default();
        let mut pending: BTreeMap<DocumentId, usize> = BTreeMap::new();
        let mut tasks = tasks.into_iter();

        while let Some(task) = tasks.next() {
            let document_id = task.document_id();
            let submitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                result = pool.submit(task) => match result {
                    Ok(()) => true,
                    Err(PoolClosed(_)) => false,
                },
            };

            if !submitted {
                report.unfinished.push(document_id);
                report
                    .unfinished
                    .extend(tasks.by_ref().map(|task| task.document_id()));
                warn!(undispatched = report.unfinished.len(), "workflow dispatch stopped early");
                break;
            }
            report.dispatched += 1;
            *pending.entry(document_id).or_default() += 1;
        }

        for (document_id, outcome) in pool.join().await {
            if let Some(count) = pending.get_mut(&document_id) {
                *count = count.saturating_sub(1);
            }
            if let Err(err) = outcome {
                report.failed += 1;
                report.unfinished.push(document_id);
                warn!(
                    %document_id,
                    error = %err,
                    cause = ?err.source_error(),
                    "workflow item failed"
                );
            }
        }

        // Items without a result panicked inside their worker.
        report.unfinished.extend(
            pending
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(document_id, _)| document_id),
        );
        report
    }
}

fn parse_cursor(data: JsonValue) -> Result<WorkflowCronData> {
    if data.is_null() {
        return Ok(WorkflowCronData::default());
    }
    serde_json::from_value(data).context("invalid workflow cron payload")
}

fn cursor_payload(cursor: WorkflowCronData) -> Result<JsonValue> {
    serde_json::to_value(cursor).context("failed to encode workflow cron payload")
}

pub struct UserReminderJob {
    runner: Arc<WorkflowRunner>,
}

#[async_trait]
impl CronHandler for UserReminderJob {
    async fn run(&self, data: JsonValue, cancel: CancellationToken) -> Result<JsonValue> {
        let cursor = parse_cursor(data)?;
        let next = self.runner.run_user_reminders(cursor, &cancel).await?;
        cursor_payload(next)
    }
}

pub struct DocumentWorkflowJob {
    runner: Arc<WorkflowRunner>,
}

#[async_trait]
impl CronHandler for DocumentWorkflowJob {
    async fn run(&self, data: JsonValue, cancel: CancellationToken) -> Result<JsonValue> {
        let cursor = parse_cursor(data)?;
        let next = self.runner.run_document_states(cursor, &cancel).await?;
        cursor_payload(next)
    }
}

/// Registers both workflow jobs on `scheduler` with the same schedule.
pub async fn register_workflow_jobs(
    scheduler: &mut CronScheduler,
    runner: Arc<WorkflowRunner>,
    schedule: CronSchedule,
) -> Result<()> {
    scheduler
        .register_job(
            USER_REMINDERS_JOB,
            schedule,
            Arc::new(UserReminderJob {
                runner: runner.clone(),
            }) as CronHandlerRef,
        )
        .await?;
    scheduler
        .register_job(
            DOCUMENT_STATES_JOB,
            schedule,
            Arc::new(DocumentWorkflowJob { runner }) as CronHandlerRef,
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        CREATOR, RecordingNotificationCenter, seed_document, seed_document_state, seed_template,
        seed_user_reminder, setup_database,
    };
    use chrono::Duration as ChronoDuration;
    use dossier_core::{
        access::AccessList,
        db::Database,
        ids::UserId,
        workflow::{AutoCloseSetting, ReminderSetting, WorkflowConfig, WorkflowState},
    };
    use serde_json::json;
    use std::time::Duration;

    fn runner(
        database: &Database,
        notifications: Arc<RecordingNotificationCenter>,
        batch_size: usize,
    ) -> Arc<WorkflowRunner> {
        let repositories = database.repositories();
        let executor = WorkflowTaskExecutor::new(
            notifications,
            repositories.workflow_repo(),
            repositories.transactions(),
        );
        let settings = WorkflowSettings {
            batch_size,
            ..WorkflowSettings::default()
        };
        Arc::new(WorkflowRunner::new(
            repositories.workflow_repo(),
            executor,
            settings,
        ))
    }

    async fn pending_user_states(database: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM workflow_user_state")
            .fetch_one(database.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn tick_sends_and_clears_every_due_reminder_before_returning() -> Result<()> {
        let (_dir, database) = setup_database().await;
        let notifications = Arc::new(RecordingNotificationCenter::default());
        let due = Utc::now() - ChronoDuration::minutes(1);
        for user in 0..7i32 {
            let document_id = seed_document(&database, None, &AccessList::default()).await;
            seed_user_reminder(&database, document_id, 10 + user, due).await;
        }

        let job = UserReminderJob {
            runner: runner(&database, notifications.clone(), 100),
        };
        let payload = job.run(json!({}), CancellationToken::new()).await?;

        assert_eq!(notifications.sent().len(), 7);
        assert_eq!(pending_user_states(&database).await, 0);
        assert_eq!(payload, json!({ "lastDocId": 0 }));
        Ok(())
    }

    #[tokio::test]
    async fn future_reminders_are_left_alone() -> Result<()> {
        let (_dir, database) = setup_database().await;
        let notifications = Arc::new(RecordingNotificationCenter::default());
        let document_id = seed_document(&database, None, &AccessList::default()).await;
        seed_user_reminder(&database, document_id, 4, Utc::now() + ChronoDuration::hours(1)).await;

        runner(&database, notifications.clone(), 100)
            .run_user_reminders(WorkflowCronData::default(), &CancellationToken::new())
            .await?;

        assert!(notifications.sent().is_empty());
        assert_eq!(pending_user_states(&database).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_recipient_is_retried_on_the_next_tick() -> Result<()> {
        let (_dir, database) = setup_database().await;
        let notifications = Arc::new(RecordingNotificationCenter::default());
        notifications.fail_for(6);
        let due = Utc::now() - ChronoDuration::minutes(1);
        let document_id = seed_document(&database, None, &AccessList::default()).await;
        for user in [5, 6, 7] {
            seed_user_reminder(&database, document_id, user, due).await;
        }
        let runner = runner(&database, notifications.clone(), 100);
        let cancel = CancellationToken::new();

        let cursor = runner
            .run_user_reminders(WorkflowCronData::default(), &cancel)
            .await?;
        assert_eq!(
            notifications.recipients(),
            vec![UserId::new(5), UserId::new(7)]
        );
        assert_eq!(pending_user_states(&database).await, 1);

        notifications.recover(6);
        runner.run_user_reminders(cursor, &cancel).await?;

        assert_eq!(notifications.sent().len(), 3);
        assert_eq!(pending_user_states(&database).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn full_batches_carry_the_cursor_forward() -> Result<()> {
        let (_dir, database) = setup_database().await;
        let notifications = Arc::new(RecordingNotificationCenter::default());
        let due = Utc::now() - ChronoDuration::minutes(1);
        let mut documents = Vec::new();
        for _ in 0..3 {
            let document_id = seed_document(&database, None, &AccessList::default()).await;
            seed_user_reminder(&database, document_id, 9, due).await;
            documents.push(document_id);
        }
        let runner = runner(&database, notifications.clone(), 2);
        let cancel = CancellationToken::new();

        let cursor = runner
            .run_user_reminders(WorkflowCronData::default(), &cancel)
            .await?;
        assert_eq!(cursor.last_doc_id, documents[1].get() - 1);
        assert_eq!(notifications.sent().len(), 2);

        let cursor = runner.run_user_reminders(cursor, &cancel).await?;
        assert_eq!(cursor, WorkflowCronData::default());
        assert_eq!(notifications.sent().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_drain_leaves_every_item_unfinished() -> Result<()> {
        let (_dir, database) = setup_database().await;
        let notifications = Arc::new(RecordingNotificationCenter::default());
        let due = Utc::now() - ChronoDuration::minutes(1);
        let first = seed_document(&database, None, &AccessList::default()).await;
        seed_user_reminder(&database, first, 3, due).await;
        let second = seed_document(&database, None, &AccessList::default()).await;
        seed_user_reminder(&database, second, 3, due).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = runner(&database, notifications.clone(), 2);

        let rows = database
            .repositories()
            .workflow_repo()
            .due_user_reminders(WorkflowCronData::default().after(), Utc::now(), 10)
            .await?;
        let tasks = rows.into_iter().map(|row| row.into_task()).collect();
        let report = runner.drain(tasks, &cancel).await;

        assert_eq!(report.dispatched, 0);
        assert_eq!(report.unfinished, vec![first, second]);
        assert!(notifications.sent().is_empty());
        assert_eq!(pending_user_states(&database).await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_tick_skips_fetch_and_keeps_cursor() -> Result<()> {
        let (_dir, database) = setup_database().await;
        let notifications = Arc::new(RecordingNotificationCenter::default());
        let due = Utc::now() - ChronoDuration::minutes(1);
        let document_id = seed_document(&database, None, &AccessList::default()).await;
        seed_user_reminder(&database, document_id, 3, due).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = runner(&database, notifications.clone(), 2);
        let cursor = WorkflowCronData { last_doc_id: 5 };

        let next = runner.run_user_reminders(cursor, &cancel).await?;
        assert_eq!(next, cursor);
        let next = runner.run_document_states(cursor, &cancel).await?;
        assert_eq!(next, cursor);

        assert!(notifications.sent().is_empty());
        assert_eq!(pending_user_states(&database).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn document_schedules_remind_then_auto_close() -> Result<()> {
        let (_dir, database) = setup_database().await;
        let notifications = Arc::new(RecordingNotificationCenter::default());
        let workflow = WorkflowConfig {
            reminder: true,
            reminder_settings: vec![
                ReminderSetting {
                    duration: Duration::from_secs(60),
                    message: Some("first nudge".into()),
                },
                ReminderSetting {
                    duration: Duration::from_secs(3600),
                    message: None,
                },
            ],
            auto_close: true,
            auto_close_settings: AutoCloseSetting {
                duration: Duration::from_secs(86_400),
                message: Some("closed for inactivity".into()),
            },
        };
        let template_id =
            seed_template(&database, Some(workflow), &AccessList::default()).await;
        let reminding = seed_document(&database, Some(template_id), &AccessList::default()).await;
        let closing = seed_document(&database, Some(template_id), &AccessList::default()).await;
        let past = Utc::now() - ChronoDuration::minutes(5);
        seed_document_state(
            &database,
            WorkflowState {
                document_id: reminding,
                next_reminder_time: Some(past),
                next_reminder_count: 0,
                auto_close_time: Some(Utc::now() + ChronoDuration::days(1)),
            },
        )
        .await;
        seed_document_state(
            &database,
            WorkflowState {
                document_id: closing,
                next_reminder_time: None,
                next_reminder_count: 2,
                auto_close_time: Some(past),
            },
        )
        .await;

        let job = DocumentWorkflowJob {
            runner: runner(&database, notifications.clone(), 100),
        };
        job.run(JsonValue::Null, CancellationToken::new()).await?;

        let sent = notifications.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|record| record.user_id == UserId::new(CREATOR)));
        assert!(
            sent.iter()
                .any(|record| record.payload["message"] == "first nudge")
        );

        let repositories = database.repositories();
        let advanced = repositories
            .workflow_repo()
            .find_document_state(reminding)
            .await?
            .expect("schedule kept");
        assert_eq!(advanced.next_reminder_count, 1);
        assert!(advanced.next_reminder_time.is_some_and(|time| time > Utc::now()));

        let closed = repositories.document_repo().find_document(closing).await?;
        assert!(closed.is_some_and(|document| document.closed));
        assert!(
            repositories
                .workflow_repo()
                .find_document_state(closing)
                .await?
                .is_none()
        );
        Ok(())
    }

    #[tokio::test]
    async fn jobs_register_and_run_through_the_scheduler() -> Result<()> {
        let (_dir, database) = setup_database().await;
        let notifications = Arc::new(RecordingNotificationCenter::default());
        let document_id = seed_document(&database, None, &AccessList::default()).await;
        seed_user_reminder(&database, document_id, 2, Utc::now()).await;

        let mut scheduler = CronScheduler::new(database.repositories().cron_repo());
        register_workflow_jobs(
            &mut scheduler,
            runner(&database, notifications.clone(), 100),
            CronSchedule::every(Duration::from_secs(60)),
        )
        .await?;

        let payload = scheduler.run_once(USER_REMINDERS_JOB).await?;
        assert_eq!(payload, json!({ "lastDocId": 0 }));
        assert_eq!(notifications.sent().len(), 1);

        let stored = database
            .repositories()
            .cron_repo()
            .find_job(DOCUMENT_STATES_JOB)
            .await?;
        assert!(stored.is_some());
        Ok(())
    }
}
