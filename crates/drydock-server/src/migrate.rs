//! Applying generated migrations to the resolved backend.

use crate::config::{Config, ConfigError};
use drydock_db::{apply_migrations, BackendResolver, DbError, MigrationApplyError};
use drydock_watch::{CommandError, CommandRunner};
use std::sync::Arc;
use thiserror::Error;

/// What a migration step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Journal entries applied in-process.
    Applied {
        /// Number of migrations applied; zero when already current.
        count: usize,
    },
    /// The configured external apply command ran successfully.
    External {
        /// The command that ran.
        command: String,
    },
}

/// Errors raised while applying migrations.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The apply command is misconfigured.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No backend could be obtained.
    #[error("failed to open database: {0}")]
    Database(#[from] DbError),

    /// The journal could not be applied.
    #[error(transparent)]
    Apply(#[from] MigrationApplyError),

    /// The external apply command failed.
    #[error("migration command failed: {0}")]
    Command(#[from] CommandError),
}

/// Applies pending migrations from the configured migrations directory.
///
/// Runs `watch.apply_command` in the project root when one is configured;
/// otherwise applies the journal through the resolver's backend.
///
/// # Errors
///
/// Returns `MigrateError` describing the step that failed. Migrations
/// applied before a failure stay applied.
pub async fn apply_pending(
    resolver: &Arc<BackendResolver>,
    config: &Config,
    runner: &dyn CommandRunner,
) -> Result<MigrationOutcome, MigrateError> {
    if let Some(command) = config.apply_command()? {
        runner.run(&command, config.root()).await?.check(&command)?;
        return Ok(MigrationOutcome::External {
            command: command.to_string(),
        });
    }

    let backend = crate::connection(resolver).await?;
    let count = apply_migrations(backend, &config.migrations_dir()).await?;
    Ok(MigrationOutcome::Applied { count })
}
