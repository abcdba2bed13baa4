//! Error types for the watch workflow.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The process could not be started.
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        /// The command line.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The process did not finish within the configured timeout and was
    /// killed.
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout {
        /// The command line.
        command: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The process exited unsuccessfully.
    #[error("`{command}` exited with {}", describe_status(.status))]
    Failed {
        /// The command line.
        command: String,
        /// Exit code, `None` if terminated by a signal.
        status: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Errors that stop the workflow from starting.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A file or directory needed before watching could not be written.
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        /// The path being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The migration-tool configuration could not be serialized.
    #[error("failed to serialize migration tool config: {0}")]
    Artifact(#[from] serde_json::Error),

    /// The watcher could not subscribe to the schema source.
    #[error("failed to watch {path}: {source}")]
    WatchSubscription {
        /// The watched path.
        path: PathBuf,
        /// Underlying watcher error.
        source: notify::Error,
    },

    /// The initial migration generation failed.
    #[error("migration generation failed: {0}")]
    Regeneration(#[from] CommandError),
}
