//! Database layer for drydock.
//!
//! Provides a single capability interface ([`SqlBackend`]) implemented by
//! three concrete adapters, a resolver that picks exactly one of them from a
//! configuration snapshot, and an in-process applier for generated migration
//! journals.
//!
//! # Design decisions
//!
//! - **Closed set of backends**: [`Backend`] is a tagged variant over the
//!   remote (libSQL over HTTP), edge (host-supplied binding) and local
//!   (SQLite file) adapters. Callers that only need to run statements hold a
//!   `&dyn SqlBackend`.
//! - **Explicit ownership of the connection**: the [`BackendResolver`] is
//!   built once during bootstrap and shared. It constructs its handle at most
//!   once, on first access, and never recreates it.
//! - **Local SQLite with WAL mode**: an `r2d2` pool of `rusqlite`
//!   connections; blocking work runs on the tokio blocking pool.

mod backend;
mod error;
mod local;
mod migrations;
mod remote;
mod resolver;
mod value;

pub use backend::{Backend, BackendKind, SqlBackend, Statement};
pub use error::{ConfigurationError, DbError, MigrationApplyError};
pub use local::{create_pool, DbPool, LocalDatabase, LocalSettings};
pub use migrations::{apply_migrations, read_migrations, MigrationFile, BREAKPOINT_MARKER};
pub use remote::RemoteDatabase;
pub use resolver::{BackendResolver, ResolverSettings};
pub use value::{QueryResult, SqlValue};
