use std::{env, fs, sync::OnceLock};

use tracing_appender::non_blocking;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: OnceLock<non_blocking::WorkerGuard> = OnceLock::new();

const LOG_DIR_ENV: &str = "DOSSIER_LOG_DIR";
const LOG_TO_STDOUT_ENV: &str = "DOSSIER_LOG_TO_STDOUT";

/// JSON logs filtered by `RUST_LOG` (default `info`). Logs go to a daily
/// rolling file under `DOSSIER_LOG_DIR` unless `DOSSIER_LOG_TO_STDOUT` is set
/// to something other than `0`.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_to_stdout() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .json()
            .with_writer(std::io::stdout)
            .try_init();
        return;
    }

    let log_dir = env::var(LOG_DIR_ENV).unwrap_or_else(|_| "logs".to_owned());
    if let Err(err) = fs::create_dir_all(&log_dir) {
        eprintln!("failed to create log dir '{log_dir}': {err}; logging to stdout");
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .json()
            .try_init();
        return;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, "dossier.log");
    let (writer, guard) = non_blocking(file_appender);

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .json()
        .with_writer(writer)
        .try_init()
        .is_ok()
    {
        let _ = LOG_GUARD.set(guard);
    }
}

fn log_to_stdout() -> bool {
    env::var(LOG_TO_STDOUT_ENV)
        .map(|value| is_enabled(&value))
        .unwrap_or(false)
}

fn is_enabled(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdout_flag_ignores_blank_and_zero() {
        assert!(is_enabled("1"));
        assert!(is_enabled("yes"));
        assert!(!is_enabled("0"));
        assert!(!is_enabled("  "));
    }
}
