//! Logging setup for hosts embedding the pacer.
//!
//! The library only emits `tracing` events. This module installs a
//! subscriber writing compact text to stderr and JSON to a daily-rotating
//! file at ~/.local/share/frame-pacer/pacer.log.

use crate::error::LoggingError;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default log directory relative to user's home
const LOG_DIR: &str = ".local/share/frame-pacer";
/// Log file prefix
const LOG_FILE_PREFIX: &str = "pacer";
/// Maximum number of log files to retain
const MAX_LOG_FILES: usize = 3;

/// Initialize the logging system with both stderr and file output.
///
/// Log level comes from `RUST_LOG`, defaulting to `info`. Per-frame
/// events are at `trace` and stay silent unless asked for.
pub fn init_logging() -> Result<LogGuard, LoggingError> {
    let log_dir = get_log_directory()?;

    std::fs::create_dir_all(&log_dir).map_err(|e| LoggingError::DirectoryCreationFailed {
        path: log_dir.display().to_string(),
        source: e,
    })?;

    let file_appender = build_file_appender(&log_dir)?;
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(non_blocking_file);

    let stderr_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(non_blocking_stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| LoggingError::AppenderCreationFailed(e.to_string()))?;

    Ok(LogGuard {
        _file_guard: file_guard,
        _stderr_guard: stderr_guard,
    })
}

/// Daily-rotating appender for `dir`, keeping the newest few files.
fn build_file_appender(dir: &Path) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| LoggingError::AppenderCreationFailed(e.to_string()))
}

/// Get the log directory path under the user's home directory.
fn get_log_directory() -> Result<PathBuf, LoggingError> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| LoggingError::HomeDirectoryNotFound)?;

    Ok(PathBuf::from(home).join(LOG_DIR))
}

/// Guard that keeps the non-blocking writers alive.
/// Must be held for the lifetime of the application.
pub struct LogGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
    _stderr_guard: tracing_appender::non_blocking::WorkerGuard,
}
