//! Daemon-specific error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop the daemon before or while it runs
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Invalid or missing configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read
    #[error("Failed to read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML
    #[error("Failed to parse config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// HTTP listener could not be bound
    #[error("Failed to bind HTTP server to {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// First sync cycle could not acquire the repository
    #[error("Bootstrap failed: {0}")]
    Bootstrap(#[from] libgitsync_core::SyncError),

    /// Scheduler stopped abnormally
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] libgitsync_core::SchedulerError),

    /// Background task failed to join
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
