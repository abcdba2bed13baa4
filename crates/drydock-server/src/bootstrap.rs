//! Sequenced startup.
//!
//! Production: select the backend eagerly so a missing backend aborts
//! startup. Development additionally writes the migration tool config and
//! schema stub, runs the initial generation, arms the schema watcher, and
//! applies pending migrations (failures there are logged, not fatal).

use crate::config::{Config, ConfigError};
use crate::migrate::{self, MigrationOutcome};
use crate::restart::{restart_channel, RestartSignal};
use drydock_db::{BackendResolver, ConfigurationError, SqlBackend};
use drydock_watch::{ArmedWatch, CommandRunner, ProcessRunner, SchemaWatchWorkflow, WatchError};
use std::sync::Arc;
use thiserror::Error;

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// No database backend applies.
    #[error(transparent)]
    Backend(#[from] ConfigurationError),

    /// The schema watcher could not be prepared or subscribed.
    #[error("failed to start schema watch: {0}")]
    Watch(#[from] WatchError),
}

/// Everything a started process owns.
#[derive(Debug)]
pub struct Runtime {
    /// The process-wide database resolver.
    pub resolver: Arc<BackendResolver>,
    /// The running schema watcher, in development.
    pub watch: Option<ArmedWatch>,
    /// Resolves when the watcher asks for a restart.
    pub restart: RestartSignal,
}

/// Runs startup with child-process commands and no edge binding.
///
/// # Errors
///
/// See [`run_with`].
pub async fn run(config: &Config) -> Result<Runtime, BootstrapError> {
    let runner = Arc::new(ProcessRunner::with_timeout(config.command_timeout()));
    run_with(config, None, runner).await
}

/// Runs startup with an explicit edge binding and command runner.
///
/// # Errors
///
/// Returns `BootstrapError::Backend` when no backend applies,
/// `BootstrapError::Watch` when development preparation or the watch
/// subscription fails, and `BootstrapError::Config` for unusable watch
/// settings.
pub async fn run_with(
    config: &Config,
    edge: Option<Arc<dyn SqlBackend>>,
    runner: Arc<dyn CommandRunner>,
) -> Result<Runtime, BootstrapError> {
    let development = config.project.development;
    let resolver = Arc::new(BackendResolver::new(config.resolver_settings(edge)));
    let backend = resolver.plan()?;
    tracing::info!(backend = %backend, development, "database backend selected");

    let (hook, restart) = restart_channel();

    if !development {
        return Ok(Runtime {
            resolver,
            watch: None,
            restart,
        });
    }

    let workflow = SchemaWatchWorkflow::new(
        config.workflow_settings()?,
        Arc::clone(&runner),
        Arc::new(hook),
    );
    let watch = workflow.start().await?;

    match migrate::apply_pending(&resolver, config, runner.as_ref()).await {
        Ok(MigrationOutcome::Applied { count: 0 }) => {
            tracing::debug!("database schema is up to date");
        }
        Ok(MigrationOutcome::Applied { count }) => {
            tracing::info!(count, "applied database migrations");
        }
        Ok(MigrationOutcome::External { command }) => {
            tracing::info!(command, "applied database migrations");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to apply migrations, keeping the current schema");
        }
    }

    Ok(Runtime {
        resolver,
        watch: Some(watch),
        restart,
    })
}
