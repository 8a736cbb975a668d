//! Error types for the frame pacer.
//!
//! The pacing path itself never fails; these errors cover configuration
//! and logging setup for the host that embeds the pacer.

use thiserror::Error;

/// Errors related to configuration management.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at '{0}'")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to write configuration: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Errors related to logging initialization.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Could not determine home directory (HOME or USERPROFILE not set)")]
    HomeDirectoryNotFound,

    #[error("Failed to create log directory '{path}': {source}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create log file appender: {0}")]
    AppenderCreationFailed(String),
}

/// Top-level errors surfaced by the demo host.
#[derive(Error, Debug)]
pub enum PacerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}
