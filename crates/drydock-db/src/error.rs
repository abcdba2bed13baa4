//! Error types for the database layer.

use std::path::PathBuf;
use thiserror::Error;

/// The configuration snapshot names no usable backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// No remote credentials, no edge binding, and not in development mode.
    #[error("no database backend configured for production")]
    NoProductionBackend,
}

/// Errors raised while constructing or using a backend.
#[derive(Debug, Error)]
pub enum DbError {
    /// The resolution policy refused to pick a backend.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The parent directory of the local database file could not be created.
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to build or check out from the connection pool.
    #[error("database connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A SQLite statement failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The remote service URL could not be parsed.
    #[error("invalid remote database url '{0}'")]
    InvalidUrl(String),

    /// The HTTP request to the remote service failed.
    #[error("remote database request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote service answered with a protocol-level error.
    #[error("remote database error: {0}")]
    Remote(String),

    /// A blocking database task panicked or was cancelled.
    #[error("database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors raised while applying a migration journal.
#[derive(Debug, Error)]
pub enum MigrationApplyError {
    /// A journal or SQL file could not be read.
    #[error("failed to read migration file {path}: {source}")]
    Read {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The journal is not valid JSON or has an unexpected shape.
    #[error("failed to parse migration journal {path}: {source}")]
    Journal {
        /// Journal file path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// Failed to query or create the tracking table.
    #[error("failed to check migration state: {0}")]
    StateQuery(DbError),

    /// The pending batch failed; its transaction was rolled back.
    #[error("migration batch [{}] failed: {source}", .tags.join(", "))]
    ExecutionFailed {
        /// Journal tags of every migration in the rolled-back batch.
        tags: Vec<String>,
        /// The underlying database error.
        source: DbError,
    },
}
