// Dossier - binary entry point
//
// Bootstrap only: environment, logging, configuration and the CLI commands.
// Services and background jobs live in the library crate.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use dossier_core::{config::AppConfig, db::Database};
use dossier_server::{
    observability,
    state::{build_scheduler, build_state},
};
use dotenvy::{Error as DotenvError, dotenv, from_filename};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Dossier document back office", long_about = None)]
struct Cli {
    /// Configuration file, overriding DOSSIER_CONFIG_FILE
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the background workflow scheduler until interrupted
    Serve,
    /// Run database migrations
    Migrate,
    /// Run one tick of every workflow job and exit
    RunWorkflow,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_status = load_env_file();
    observability::init_tracing();
    report_env_status(&env_status);

    let cli = Cli::parse();
    let config = AppConfig::load_with(cli.config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_serve(config).await,
        Command::Migrate => run_migrate(config).await,
        Command::RunWorkflow => run_workflow(config).await,
    }
}

async fn run_serve(config: AppConfig) -> Result<()> {
    info!(
        database_path = %config.database_path,
        database_max_connections = config.database_max_connections,
        workflow_enabled = config.workflow.enabled,
        workflow_schedule = %config.workflow.schedule,
        workflow_workers = config.workflow.workers,
        "starting dossier"
    );
    let database = Database::connect(&config).await?;
    let notifications = database.notification_center();
    let state = build_state(config, database.clone(), notifications);

    let scheduler = build_scheduler(&state).await?;
    scheduler.start();
    info!("scheduler running; waiting for shutdown signal");

    shutdown_signal().await;
    info!("shutdown requested; draining in-flight jobs");
    scheduler.shutdown().await;
    database.close().await;
    Ok(())
}

async fn run_migrate(config: AppConfig) -> Result<()> {
    let database = Database::connect(&config).await?;
    database.close().await;
    info!("migrations completed");
    Ok(())
}

async fn run_workflow(config: AppConfig) -> Result<()> {
    let database = Database::connect(&config).await?;
    let notifications = database.notification_center();
    let state = build_state(config, database.clone(), notifications);
    let scheduler = build_scheduler(&state).await?;

    let names: Vec<String> = scheduler.job_names().map(str::to_owned).collect();
    if names.is_empty() {
        warn!("no workflow jobs registered; is the workflow disabled?");
    }

    let mut failed = 0usize;
    for name in &names {
        match scheduler.run_once(name).await {
            Ok(payload) => info!(job = %name, %payload, "workflow job finished"),
            Err(err) => {
                failed += 1;
                error!(job = %name, error = %format!("{err:#}"), "workflow job failed");
            }
        }
    }
    database.close().await;

    if failed > 0 {
        anyhow::bail!("{failed} workflow job(s) failed");
    }
    Ok(())
}

enum EnvLoadStatus {
    Loaded(PathBuf),
    NotFound,
    Failed(DotenvError),
}

fn load_env_file() -> EnvLoadStatus {
    if let Ok(env_file) = std::env::var("DOSSIER_ENV_FILE") {
        let trimmed = env_file.trim();
        if !trimmed.is_empty() {
            let path = PathBuf::from(trimmed);
            return match from_filename(&path) {
                Ok(_) => {
                    let display_path = make_relative(&path).unwrap_or_else(|| path.clone());
                    EnvLoadStatus::Loaded(display_path)
                }
                Err(err) => EnvLoadStatus::Failed(err),
            };
        }
    }

    match dotenv() {
        Ok(path) => {
            let display_path = make_relative(&path).unwrap_or_else(|| path.clone());
            EnvLoadStatus::Loaded(display_path)
        }
        Err(DotenvError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            EnvLoadStatus::NotFound
        }
        Err(err) => EnvLoadStatus::Failed(err),
    }
}

fn report_env_status(status: &EnvLoadStatus) {
    match status {
        EnvLoadStatus::Loaded(path) => {
            info!("Loaded environment variables from {}", path.display());
        }
        EnvLoadStatus::NotFound => {
            info!("No .env file found; using process environment only");
        }
        EnvLoadStatus::Failed(err) => {
            warn!("Failed to load .env file: {err:?}");
        }
    }
}

fn make_relative(path: &Path) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    path.strip_prefix(&cwd).map(|p| p.to_path_buf()).ok()
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut term), Ok(mut int)) => {
                tokio::select! {
                    _ = term.recv() => {},
                    _ = int.recv() => {},
                }
            }
            (term, int) => {
                if let Err(err) = term.and(int) {
                    warn!(error = %err, "failed to install signal handlers; falling back to ctrl-c");
                }
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
