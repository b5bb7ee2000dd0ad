//! File logging for the hook CLI.
//!
//! Editor hooks run in the background, so nothing is written to the terminal.
//! Logs roll daily under `~/.chrontic/logs/`.

use chrontic_daemon_protocol::STATE_DIR_NAME;
use fs_err as fs;
use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "hook.log";

/// Keep the guard alive until exit so buffered lines are flushed.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = log_dir()?;
    if fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry().with(filter());
    let initialized = registry
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init();
    if initialized.is_err() {
        return None;
    }
    Some(guard)
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var("CHRONTIC_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(STATE_DIR_NAME).join("logs"))
}
