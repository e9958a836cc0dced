use std::sync::Arc;

use anyhow::{Context, Result};
use dossier_core::{
    config::AppConfig,
    db::{Database, RepositoryRegistry},
    notification::NotificationCenterRef,
};
use tracing::info;

use crate::{
    cron::{CronSchedule, CronScheduler},
    doc::{DocumentAccessService, DocumentLifecycleService, ReminderService},
    workflow::{WorkflowRunner, WorkflowTaskExecutor, register_workflow_jobs},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub database: Database,
    pub repositories: Arc<RepositoryRegistry>,
    pub notifications: NotificationCenterRef,
    pub access_service: Arc<DocumentAccessService>,
    pub lifecycle_service: Arc<DocumentLifecycleService>,
    pub reminder_service: Arc<ReminderService>,
    pub workflow_runner: Arc<WorkflowRunner>,
}

/// Wires services over `database`. Notifications go to `notifications`,
/// normally the database's own center.
pub fn build_state(
    config: AppConfig,
    database: Database,
    notifications: NotificationCenterRef,
) -> AppState {
    let repositories = database.repositories();

    let access_service = Arc::new(DocumentAccessService::new(
        repositories.access_repo(),
        repositories.document_repo(),
        repositories.transactions(),
    ));
    let lifecycle_service = Arc::new(DocumentLifecycleService::new(
        access_service.clone(),
        repositories.transactions(),
    ));
    let reminder_service = Arc::new(ReminderService::new(
        access_service.clone(),
        repositories.workflow_repo(),
    ));

    let executor = WorkflowTaskExecutor::new(
        notifications.clone(),
        repositories.workflow_repo(),
        repositories.transactions(),
    );
    let workflow_runner = Arc::new(WorkflowRunner::new(
        repositories.workflow_repo(),
        executor,
        config.workflow.clone(),
    ));

    AppState {
        config: Arc::new(config),
        database,
        repositories,
        notifications,
        access_service,
        lifecycle_service,
        reminder_service,
        workflow_runner,
    }
}

/// Scheduler with the workflow jobs registered, unless workflows are
/// disabled in the configuration.
pub async fn build_scheduler(state: &AppState) -> Result<CronScheduler> {
    let mut scheduler = CronScheduler::new(state.repositories.cron_repo());
    let settings = &state.config.workflow;

    if !settings.enabled {
        info!("workflow jobs disabled");
        return Ok(scheduler);
    }

    let schedule: CronSchedule = settings
        .schedule
        .parse()
        .with_context(|| format!("invalid workflow schedule {:?}", settings.schedule))?;
    register_workflow_jobs(&mut scheduler, state.workflow_runner.clone(), schedule).await?;
    Ok(scheduler)
}
