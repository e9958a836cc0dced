use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};

use self::{
    access_repo::AccessRepositoryRef,
    cron_repo::CronJobRepositoryRef,
    document_repo::DocumentRepositoryRef,
    sqlite::{
        access_repo::SqliteAccessRepository, connection as sqlite_connection,
        cron_repo::SqliteCronJobRepository, document_repo::SqliteDocumentRepository,
        notification_center::SqliteNotificationCenter, transaction::SqliteTransactionSource,
        workflow_repo::SqliteWorkflowRepository,
    },
    transaction::TransactionSourceRef,
    workflow_repo::WorkflowRepositoryRef,
};
use crate::{config::AppConfig, notification::NotificationCenterRef};

pub mod access_repo;
pub mod cron_repo;
pub mod document_repo;
pub mod errors;
pub mod sqlite;
pub mod transaction;
pub mod workflow_repo;

#[derive(Clone)]
pub struct RepositoryRegistry {
    access_repo: AccessRepositoryRef,
    document_repo: DocumentRepositoryRef,
    workflow_repo: WorkflowRepositoryRef,
    cron_repo: CronJobRepositoryRef,
    transactions: TransactionSourceRef,
}

impl RepositoryRegistry {
    pub fn new(
        access_repo: AccessRepositoryRef,
        document_repo: DocumentRepositoryRef,
        workflow_repo: WorkflowRepositoryRef,
        cron_repo: CronJobRepositoryRef,
        transactions: TransactionSourceRef,
    ) -> Self {
        Self {
            access_repo,
            document_repo,
            workflow_repo,
            cron_repo,
            transactions,
        }
    }

    pub fn access_repo(&self) -> AccessRepositoryRef {
        self.access_repo.clone()
    }

    pub fn document_repo(&self) -> DocumentRepositoryRef {
        self.document_repo.clone()
    }

    pub fn workflow_repo(&self) -> WorkflowRepositoryRef {
        self.workflow_repo.clone()
    }

    pub fn cron_repo(&self) -> CronJobRepositoryRef {
        self.cron_repo.clone()
    }

    pub fn transactions(&self) -> TransactionSourceRef {
        self.transactions.clone()
    }
}

#[derive(Clone)]
pub struct Database {
    pool: sqlite_connection::SqlitePool,
    path: PathBuf,
    repositories: Arc<RepositoryRegistry>,
    notifications: NotificationCenterRef,
}

impl Database {
    /// Opens the pool and applies pending migrations.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let db_file = Self::resolve_db_path(&config.database_path)?;
        if let Some(dir) = db_file.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("failed to create database directory: {}", dir.display())
            })?;
        }

        let pool =
            sqlite_connection::create_pool(&db_file, config.database_max_connections).await?;
        sqlite_connection::run_migrations(&pool).await?;
        tracing::debug!(path = %db_file.display(), "sqlite database ready");

        let repositories = Arc::new(RepositoryRegistry::new(
            Arc::new(SqliteAccessRepository::new(pool.clone())) as AccessRepositoryRef,
            Arc::new(SqliteDocumentRepository::new(pool.clone())) as DocumentRepositoryRef,
            Arc::new(SqliteWorkflowRepository::new(pool.clone())) as WorkflowRepositoryRef,
            Arc::new(SqliteCronJobRepository::new(pool.clone())) as CronJobRepositoryRef,
            Arc::new(SqliteTransactionSource::new(pool.clone())) as TransactionSourceRef,
        ));
        let notifications =
            Arc::new(SqliteNotificationCenter::new(pool.clone())) as NotificationCenterRef;

        Ok(Self {
            pool,
            path: db_file,
            repositories,
            notifications,
        })
    }

    pub fn pool(&self) -> &sqlite_connection::SqlitePool {
        &self.pool
    }

    pub fn database_path(&self) -> &PathBuf {
        &self.path
    }

    pub fn repositories(&self) -> Arc<RepositoryRegistry> {
        self.repositories.clone()
    }

    pub fn notification_center(&self) -> NotificationCenterRef {
        self.notifications.clone()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn resolve_db_path(path: &str) -> Result<PathBuf> {
        let path = PathBuf::from(path);
        if path.is_absolute() {
            Ok(path)
        } else {
            let cwd = std::env::current_dir().context("failed to obtain current directory")?;
            Ok(cwd.join(path))
        }
    }
}
