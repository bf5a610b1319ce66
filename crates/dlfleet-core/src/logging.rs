//! Logging init: append to a file in the XDG state dir, or stderr as a fallback.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,dlfleet=debug,dlfleet_core=debug";
const LOG_FILE: &str = "dlfleet.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Path of the log file under `dir`, creating the directory if needed.
fn prepare_log_path(dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
    Ok(dir.join(LOG_FILE))
}

/// Initialize structured logging to `~/.local/state/dlfleet/dlfleet.log`.
///
/// Returns `Err` if the file cannot be opened or a subscriber is already
/// installed; the binary then calls [`init_logging_stderr`].
pub fn init_logging() -> Result<()> {
    let path = prepare_log_path(&crate::config::state_dir()?)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install log subscriber: {}", e))?;

    tracing::info!(path = %path.display(), "logging initialized");
    Ok(())
}

/// Log to stderr only. Never fails; a second call is a no-op.
pub fn init_logging_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
