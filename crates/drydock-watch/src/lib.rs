//! Schema watch workflow for drydock development mode.
//!
//! Watches the schema source file, regenerates migrations with an external
//! generator when it changes, then closes the watch and asks the host to
//! restart so the new process applies the fresh migrations.
//!
//! ```text
//! Idle -> Preparing -> Watching -> Triggered -> Regenerating -> AwaitingRestart
//!                         ^                          |
//!                         +------ generator failed --+
//! ```
//!
//! The pieces are usable on their own: [`Debouncer`] is a pure coalescing
//! state machine, [`WatchSession`] turns a stream of change events into
//! debounced triggers, and [`CommandRunner`] abstracts the external commands
//! so tests can substitute them.

mod artifact;
mod command;
mod debounce;
mod error;
mod session;
mod workflow;

pub use artifact::{
    ensure_schema_source, relative_to, write_tool_config, MigrationToolConfig, SCHEMA_STUB,
};
pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use debounce::Debouncer;
pub use error::{CommandError, WatchError};
pub use session::{ChangeEvent, SessionHandle, WatchSession};
pub use workflow::{
    ArmedWatch, CycleOutcome, RestartHook, SchemaWatchWorkflow, WorkflowSettings, WorkflowState,
    DEFAULT_DEBOUNCE,
};
