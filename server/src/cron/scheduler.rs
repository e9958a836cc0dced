use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use dossier_core::db::cron_repo::CronJobRepositoryRef;
use serde_json::Value as JsonValue;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use super::schedule::CronSchedule;

/// Work run on every tick of a registered job. The handler receives the
/// payload stored by its previous successful run and returns the next one.
#[async_trait]
pub trait CronHandler: Send + Sync {
    async fn run(&self, data: JsonValue, cancel: CancellationToken) -> Result<JsonValue>;
}

pub type CronHandlerRef = Arc<dyn CronHandler>;

#[derive(Clone)]
struct RegisteredJob {
    schedule: CronSchedule,
    handler: CronHandlerRef,
}

/// Owns the registered jobs and their tick loops. Ticks of one job never
/// overlap because each loop awaits its handler before waiting for the next
/// interval.
pub struct CronScheduler {
    repo: CronJobRepositoryRef,
    jobs: BTreeMap<String, RegisteredJob>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl CronScheduler {
    pub fn new(repo: CronJobRepositoryRef) -> Self {
        Self {
            repo,
            jobs: BTreeMap::new(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Adds a job and persists its row if this is the first registration.
    pub async fn register_job(
        &mut self,
        name: &str,
        schedule: CronSchedule,
        handler: CronHandlerRef,
    ) -> Result<()> {
        self.repo
            .ensure_job(name, &schedule.to_string())
            .await
            .with_context(|| format!("failed to register cron job {name}"))?;
        self.jobs
            .insert(name.to_owned(), RegisteredJob { schedule, handler });
        info!(job = name, %schedule, "registered cron job");
        Ok(())
    }

    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// Spawns one tick loop per job. The first tick fires one interval after
    /// start.
    pub fn start(&self) {
        for (name, job) in &self.jobs {
            let name = name.clone();
            let job = job.clone();
            let repo = self.repo.clone();
            let cancel = self.cancel.clone();

            self.tracker.spawn(async move {
                let period = job.schedule.interval();
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    // Not raced against cancellation: an in-flight tick drains
                    // its own work before the loop observes shutdown.
                    if let Err(error) =
                        execute(&repo, &name, job.handler.as_ref(), cancel.child_token()).await
                    {
                        warn!(job = %name, error = %format!("{error:#}"), "cron tick failed");
                    }
                }
                debug!(job = %name, "cron loop stopped");
            });
        }
    }

    /// Runs a single tick of `name` right away and returns the stored payload.
    pub async fn run_once(&self, name: &str) -> Result<JsonValue> {
        let job = self
            .jobs
            .get(name)
            .ok_or_else(|| anyhow!("cron job {name} is not registered"))?;
        execute(&self.repo, name, job.handler.as_ref(), self.cancel.child_token()).await
    }

    /// Stops scheduling new ticks and waits for in-flight ones to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("cron scheduler stopped");
    }
}

async fn execute(
    repo: &CronJobRepositoryRef,
    name: &str,
    handler: &dyn CronHandler,
    cancel: CancellationToken,
) -> Result<JsonValue> {
    let record = repo
        .find_job(name)
        .await?
        .with_context(|| format!("cron job {name} has no stored row"))?;
    repo.mark_started(name, Utc::now()).await?;

    match handler.run(record.data, cancel).await {
        Ok(data) => {
            repo.record_success(name, &data, Utc::now()).await?;
            Ok(data)
        }
        Err(error) => {
            repo.record_failure(name, &format!("{error:#}")).await?;
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_database;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    /// Counts ticks in its payload and remembers every payload it was given.
    struct CountingHandler {
        seen: Mutex<Vec<JsonValue>>,
        fail: bool,
    }

    #[async_trait]
    impl CronHandler for CountingHandler {
        async fn run(&self, data: JsonValue, _cancel: CancellationToken) -> Result<JsonValue> {
            self.seen.lock().push(data.clone());
            if self.fail {
                return Err(anyhow!("handler exploded"));
            }
            let count = data["count"].as_u64().unwrap_or(0);
            Ok(json!({ "count": count + 1 }))
        }
    }

    fn handler(fail: bool) -> Arc<CountingHandler> {
        Arc::new(CountingHandler {
            seen: Mutex::new(Vec::new()),
            fail,
        })
    }

    #[tokio::test]
    async fn run_once_threads_the_payload_between_runs() {
        let (_dir, database) = setup_database().await;
        let repo = database.repositories().cron_repo();
        let counting = handler(false);
        let mut scheduler = CronScheduler::new(repo.clone());
        scheduler
            .register_job("count", CronSchedule::every(Duration::from_secs(60)), counting.clone())
            .await
            .unwrap();

        scheduler.run_once("count").await.unwrap();
        let second = scheduler.run_once("count").await.unwrap();

        assert_eq!(second, json!({ "count": 2 }));
        assert_eq!(counting.seen.lock()[0], json!({}));
        let stored = repo.find_job("count").await.unwrap().unwrap();
        assert_eq!(stored.data, json!({ "count": 2 }));
        assert!(stored.last_completed_at.is_some());
    }

    #[tokio::test]
    async fn failing_handler_keeps_previous_payload() {
        let (_dir, database) = setup_database().await;
        let repo = database.repositories().cron_repo();
        repo.ensure_job("broken", "@every 1m").await.unwrap();
        repo.record_success("broken", &json!({ "lastDocId": 7 }), Utc::now())
            .await
            .unwrap();

        let failing = handler(true);
        let mut scheduler = CronScheduler::new(repo.clone());
        scheduler
            .register_job("broken", CronSchedule::every(Duration::from_secs(60)), failing.clone())
            .await
            .unwrap();

        assert!(scheduler.run_once("broken").await.is_err());

        assert_eq!(failing.seen.lock()[0], json!({ "lastDocId": 7 }));
        let stored = repo.find_job("broken").await.unwrap().unwrap();
        assert_eq!(stored.data, json!({ "lastDocId": 7 }));
        assert_eq!(stored.last_error.as_deref(), Some("handler exploded"));
    }

    #[tokio::test]
    async fn unknown_jobs_cannot_run() {
        let (_dir, database) = setup_database().await;
        let scheduler = CronScheduler::new(database.repositories().cron_repo());

        assert!(scheduler.run_once("missing").await.is_err());
    }

    #[tokio::test]
    async fn started_loops_tick_until_shutdown() {
        let (_dir, database) = setup_database().await;
        let counting = handler(false);
        let mut scheduler = CronScheduler::new(database.repositories().cron_repo());
        scheduler
            .register_job("fast", CronSchedule::every(Duration::from_secs(1)), counting.clone())
            .await
            .unwrap();

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await;
        let ticks = counting.seen.lock().len();

        assert!(ticks >= 1, "expected at least one tick, saw {ticks}");
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(counting.seen.lock().len(), ticks);
    }
}
