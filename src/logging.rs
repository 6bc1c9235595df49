//! File logging for the CLI. Stdout carries command output, so diagnostics
//! go to a daily log file under the data directory.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::data_dir;

const LOG_ENV: &str = "SENSE_DASH_LOG";
const LOG_FILE: &str = "sense-dash.log";

/// Install the global subscriber. Keep the returned guard alive until exit
/// or buffered lines are lost.
pub fn init() -> Result<WorkerGuard> {
  let log_dir = data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir).map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE);
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_writer(non_blocking)
    .with_env_filter(filter)
    .with_ansi(false)
    .with_target(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
