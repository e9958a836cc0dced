use std::{env, fs, path::PathBuf, str::FromStr};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,
    #[serde(default)]
    pub workflow: WorkflowSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            database_max_connections: default_database_max_connections(),
            workflow: WorkflowSettings::default(),
        }
    }
}

/// Background workflow scheduler settings, the `[workflow]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_schedule(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl AppConfig {
    const CONFIG_ENV: &'static str = "DOSSIER_CONFIG_FILE";
    const DATABASE_PATH_ENV: &'static str = "DOSSIER_DATABASE_PATH";
    const DATABASE_MAX_CONNECTIONS_ENV: &'static str = "DOSSIER_DATABASE_MAX_CONNECTIONS";
    const WORKFLOW_ENABLED_ENV: &'static str = "DOSSIER_WORKFLOW_ENABLED";
    const WORKFLOW_SCHEDULE_ENV: &'static str = "DOSSIER_WORKFLOW_SCHEDULE";

    /// Load configuration from defaults layered with optional config files and
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    pub fn load_with(config_path: Option<PathBuf>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(config_path)? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Ok(path) = env::var(Self::DATABASE_PATH_ENV) {
            config.database_path = path;
        }

        if let Some(max) = parse_env::<u32>(Self::DATABASE_MAX_CONNECTIONS_ENV)? {
            config.database_max_connections = max;
        }

        if let Ok(raw) = env::var(Self::WORKFLOW_ENABLED_ENV) {
            config.workflow.enabled = parse_flag(&raw)
                .with_context(|| format!("invalid {name}", name = Self::WORKFLOW_ENABLED_ENV))?;
        }

        if let Ok(schedule) = env::var(Self::WORKFLOW_SCHEDULE_ENV) {
            config.workflow.schedule = schedule;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        let workflow = &self.workflow;
        if workflow.batch_size == 0 || workflow.workers == 0 || workflow.queue_capacity == 0 {
            return Err(anyhow!(
                "workflow batch_size, workers and queue_capacity must be greater than zero"
            ));
        }
        Ok(())
    }

    fn resolve_config_path(explicit: Option<PathBuf>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            return Self::validate_path(path);
        }

        if let Ok(path) = env::var(Self::CONFIG_ENV) {
            return Self::validate_path(PathBuf::from(path));
        }

        let mut candidates = vec![PathBuf::from("dossier.toml")];
        if let Some(dir) = Self::default_config_dir() {
            candidates.push(dir.join("config.toml"));
        }

        Ok(candidates.into_iter().find(|candidate| candidate.exists()))
    }

    fn validate_path(path: PathBuf) -> Result<Option<PathBuf>> {
        if path.exists() {
            Ok(Some(path))
        } else {
            Err(anyhow!(
                "configuration file does not exist: {}",
                path.display()
            ))
        }
    }

    fn default_config_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".dossier"))
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {name}")),
        Err(_) => Ok(None),
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean, got {other:?}")),
    }
}

fn default_database_path() -> String {
    "./data/dossier.db".to_owned()
}

fn default_database_max_connections() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_schedule() -> String {
    "@every 1m".to_owned()
}

fn default_batch_size() -> usize {
    100
}

fn default_workers() -> usize {
    3
}

fn default_queue_capacity() -> usize {
    3
}

fn home_dir() -> Option<PathBuf> {
    if let Some(path) = env::var_os("HOME") {
        return Some(PathBuf::from(path));
    }

    if let Some(path) = env::var_os("USERPROFILE") {
        return Some(PathBuf::from(path));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();

        assert_eq!(config.database_path, "./data/dossier.db");
        assert_eq!(config.database_max_connections, 4);
        assert!(config.workflow.enabled);
        assert_eq!(config.workflow.schedule, "@every 1m");
        assert_eq!(config.workflow.batch_size, 100);
        assert_eq!(config.workflow.workers, 3);
        assert_eq!(config.workflow.queue_capacity, 3);
    }

    #[test]
    fn partial_workflow_table_keeps_other_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            database_path = "/tmp/docs.db"

            [workflow]
            batch_size = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, "/tmp/docs.db");
        assert_eq!(config.workflow.batch_size, 25);
        assert_eq!(config.workflow.workers, 3);
        assert!(config.workflow.enabled);
    }

    #[test]
    fn explicit_config_file_is_loaded() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "database_max_connections = 9\n[workflow]\nworkers = 5")?;

        let config = AppConfig::load_with(Some(file.path().to_path_buf()))?;

        assert_eq!(config.workflow.workers, 5);
        Ok(())
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let missing = PathBuf::from("/nonexistent/dossier-config.toml");
        assert!(AppConfig::load_with(Some(missing)).is_err());
    }

    #[test]
    fn zero_sized_pool_is_rejected() {
        let mut config = AppConfig::default();
        config.workflow.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("TRUE").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}
