//! The common capability interface and the closed set of backend kinds.

use crate::error::DbError;
use crate::local::LocalDatabase;
use crate::remote::RemoteDatabase;
use crate::value::{QueryResult, SqlValue};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A statement with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text. Parameters are bound to `?` placeholders in order.
    pub sql: String,
    /// Positional parameters.
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// A statement with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// A statement with positional parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Operations every backend supports.
///
/// Edge bindings supplied by the hosting platform implement this trait
/// directly and are wrapped by [`Backend::Edge`].
#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Runs a statement that returns no rows. Returns the number of rows
    /// affected.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError>;

    /// Runs a query and collects every row.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DbError>;

    /// Runs all statements inside one transaction. Either every statement is
    /// applied or none is.
    async fn transaction(&self, statements: &[Statement]) -> Result<(), DbError>;
}

/// Which of the three backends a resolver selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Remote managed SQL service (libSQL over HTTP).
    Remote,
    /// Edge-distributed SQL service reached through a platform binding.
    Edge,
    /// Local embedded SQLite file.
    Local,
}

impl BackendKind {
    /// Stable lowercase name, used in logs and health output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Edge => "edge",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open handle to exactly one backend.
pub enum Backend {
    /// Remote managed SQL service.
    Remote(RemoteDatabase),
    /// Host-supplied edge binding.
    Edge(Arc<dyn SqlBackend>),
    /// Local SQLite file.
    Local(LocalDatabase),
}

impl Backend {
    /// The kind of backend this handle talks to.
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Remote(_) => BackendKind::Remote,
            Self::Edge(_) => BackendKind::Edge,
            Self::Local(_) => BackendKind::Local,
        }
    }

    /// The local database, if this handle is one.
    pub fn as_local(&self) -> Option<&LocalDatabase> {
        match self {
            Self::Local(db) => Some(db),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn SqlBackend {
        match self {
            Self::Remote(db) => db,
            Self::Edge(db) => db.as_ref(),
            Self::Local(db) => db,
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(db) => f.debug_tuple("Remote").field(db).finish(),
            Self::Edge(_) => f.debug_tuple("Edge").field(&"<binding>").finish(),
            Self::Local(db) => f.debug_tuple("Local").field(db).finish(),
        }
    }
}

#[async_trait]
impl SqlBackend for Backend {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        self.inner().execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DbError> {
        self.inner().query(sql, params).await
    }

    async fn transaction(&self, statements: &[Statement]) -> Result<(), DbError> {
        self.inner().transaction(statements).await
    }
}
