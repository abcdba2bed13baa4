//! The schema watch state machine.

use crate::artifact::{ensure_schema_source, relative_to, write_tool_config, MigrationToolConfig};
use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{CommandError, WatchError};
use crate::session::{SessionHandle, WatchSession};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default quiet window for coalescing schema edits.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Receives the single restart request a successful cycle emits.
///
/// The request is fire-and-forget: implementations must not block and the
/// workflow never waits for an acknowledgement.
pub trait RestartHook: Send + Sync {
    /// Asks the host to restart the process.
    fn request_restart(&self);
}

/// Where a workflow is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    /// Constructed, nothing done yet.
    Idle,
    /// Writing the tool config, the schema stub, and running the initial
    /// generation.
    Preparing,
    /// Subscribed and waiting for a change.
    Watching,
    /// A debounced change was observed.
    Triggered,
    /// The generator is running.
    Regenerating,
    /// The session is closed and a restart was requested. Terminal.
    AwaitingRestart,
}

/// How a watch cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Migrations were regenerated and a restart was requested.
    RestartRequested,
    /// The session was closed (or its event source ended) first.
    SessionClosed,
}

/// Paths and commands the workflow operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Project root; commands run here and the tool config is written here.
    pub root: PathBuf,
    /// The watched schema source file.
    pub schema_path: PathBuf,
    /// Where generated migrations go.
    pub migrations_dir: PathBuf,
    /// File name of the tool config written under `root`.
    pub artifact_name: String,
    /// Quiet window for coalescing edits.
    pub debounce: Duration,
    /// The migration generator.
    pub generate: CommandSpec,
}

impl WorkflowSettings {
    /// Settings rooted at `root` with the conventional layout.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            schema_path: root.join("server").join("db").join("tables.ts"),
            migrations_dir: root.join("server").join("db").join("migrations"),
            artifact_name: "drizzle.config.json".to_string(),
            debounce: DEFAULT_DEBOUNCE,
            generate: CommandSpec::new("npx", ["drizzle-kit", "generate:sqlite"]),
            root,
        }
    }
}

/// A workflow that has been prepared and subscribed, running in the
/// background.
#[derive(Debug)]
pub struct ArmedWatch {
    /// Observes or closes the active session.
    pub session: SessionHandle,
    /// Resolves when the cycle ends.
    pub task: JoinHandle<CycleOutcome>,
}

/// Watches the schema source and drives regenerate-then-restart cycles.
pub struct SchemaWatchWorkflow {
    settings: WorkflowSettings,
    runner: Arc<dyn CommandRunner>,
    hook: Arc<dyn RestartHook>,
    state: watch::Sender<WorkflowState>,
}

impl SchemaWatchWorkflow {
    /// Creates an idle workflow.
    pub fn new(
        settings: WorkflowSettings,
        runner: Arc<dyn CommandRunner>,
        hook: Arc<dyn RestartHook>,
    ) -> Self {
        let (state, _) = watch::channel(WorkflowState::Idle);
        Self {
            settings,
            runner,
            hook,
            state,
        }
    }

    /// The settings this workflow was built with.
    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// The current state.
    pub fn state(&self) -> WorkflowState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkflowState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: WorkflowState) {
        let prev = self.state.send_replace(next);
        tracing::trace!(?prev, ?next, "schema workflow transition");
    }

    /// Writes the tool config, creates the schema stub if missing, and runs
    /// the generator once so a fresh checkout starts migration-consistent.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::Prepare` if a file cannot be written, or
    /// `WatchError::Regeneration` if the initial generation fails.
    pub async fn prepare(&mut self) -> Result<(), WatchError> {
        self.set_state(WorkflowState::Preparing);
        let settings = &self.settings;

        let tool_config = MigrationToolConfig::new(
            &settings.root,
            &settings.migrations_dir,
            &settings.schema_path,
        );
        let artifact = write_tool_config(&settings.root, &settings.artifact_name, &tool_config)?;
        tracing::debug!(path = %artifact.display(), "wrote migration tool config");

        if ensure_schema_source(&settings.schema_path)? {
            tracing::info!(
                path = %relative_to(&settings.root, &settings.schema_path),
                "created placeholder schema source"
            );
        }

        self.generate().await?;
        Ok(())
    }

    /// Subscribes a filesystem watcher to the schema source.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::WatchSubscription` if the subscription fails.
    pub fn subscribe(&mut self) -> Result<WatchSession, WatchError> {
        let session = WatchSession::subscribe(&self.settings.schema_path, self.settings.debounce)?;
        self.set_state(WorkflowState::Watching);
        Ok(session)
    }

    /// Prepares, subscribes, and spawns the watch loop.
    ///
    /// # Errors
    ///
    /// Returns the preparation or subscription error; both are fatal.
    pub async fn start(mut self) -> Result<ArmedWatch, WatchError> {
        self.prepare().await?;
        let session = self.subscribe()?;
        let handle = session.handle();
        let task = tokio::spawn(self.watch(session));
        Ok(ArmedWatch {
            session: handle,
            task,
        })
    }

    /// Runs the watch loop on `session` until a cycle completes or the
    /// session closes.
    ///
    /// A failed regeneration is logged and the loop keeps watching. A
    /// successful one closes the session, then requests a restart.
    pub async fn watch(self, mut session: WatchSession) -> CycleOutcome {
        self.set_state(WorkflowState::Watching);

        while let Some(event) = session.next_trigger().await {
            self.set_state(WorkflowState::Triggered);
            tracing::info!(
                path = %relative_to(&self.settings.root, &event.path),
                command = %self.settings.generate,
                "schema source changed, regenerating migrations"
            );

            self.set_state(WorkflowState::Regenerating);
            match self.generate().await {
                Ok(_) => {
                    session.close();
                    self.set_state(WorkflowState::AwaitingRestart);
                    tracing::info!("restarting server to migrate database");
                    self.hook.request_restart();
                    return CycleOutcome::RestartRequested;
                }
                Err(e) => {
                    log_regeneration_failure(&e);
                    self.set_state(WorkflowState::Watching);
                }
            }
        }

        session.close();
        CycleOutcome::SessionClosed
    }

    async fn generate(&self) -> Result<CommandOutput, CommandError> {
        let command = &self.settings.generate;
        let output = self
            .runner
            .run(command, &self.settings.root)
            .await?
            .check(command)?;
        tracing::debug!(command = %command, stdout = %output.stdout.trim(), "generator finished");
        Ok(output)
    }
}

fn log_regeneration_failure(error: &CommandError) {
    match error {
        CommandError::Failed {
            command,
            status,
            stdout,
            stderr,
        } => tracing::error!(
            command = %command,
            status = ?status,
            stdout = %stdout.trim(),
            stderr = %stderr.trim(),
            "migration generation failed, still watching"
        ),
        other => tracing::error!(error = %other, "migration generation failed, still watching"),
    }
}
