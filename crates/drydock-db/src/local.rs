//! Local SQLite backend: connection pool creation and the blocking adapter.

use crate::backend::{SqlBackend, Statement};
use crate::error::DbError;
use crate::value::{QueryResult, SqlValue};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params_from_iter, OpenFlags};
use std::path::{Path, PathBuf};

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Creates a new SQLite connection pool with WAL mode and foreign keys enabled.
///
/// # Arguments
///
/// * `db_path` - Path to the SQLite database file. Use `:memory:` for an
///   in-memory database (each pooled connection gets its own database).
///
/// # Errors
///
/// Returns `DbError::Pool` if the connection pool cannot be created.
pub fn create_pool(db_path: &Path, settings: LocalSettings) -> Result<DbPool, DbError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            // In-memory databases report "memory", which is acceptable.
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!(
                        "failed to set WAL journal mode, got: {}",
                        journal_mode
                    )),
                ));
            }
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {};",
                settings.busy_timeout_ms
            ))
        });

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    Ok(pool)
}

/// Creates the parent directory of `path` if it is missing. Idempotent.
fn ensure_parent_dir(path: &Path) -> Result<(), DbError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent).map_err(|source| DbError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
            tracing::info!(path = %parent.display(), "created database directory");
            Ok(())
        }
        _ => Ok(()),
    }
}

/// An open local SQLite database.
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    path: PathBuf,
    pool: DbPool,
}

impl LocalDatabase {
    /// Opens the database file at `path`, creating its parent directories and
    /// the file itself if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `DbError::CreateDir` if the directory cannot be created, or
    /// `DbError::Pool` if the pool cannot open the file.
    pub fn open(path: &Path, settings: LocalSettings) -> Result<Self, DbError> {
        if path != Path::new(":memory:") {
            ensure_parent_dir(path)?;
        }
        let pool = create_pool(path, settings)?;
        Ok(Self {
            path: path.to_path_buf(),
            pool,
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying connection pool, for synchronous callers.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn run_statement(conn: &rusqlite::Connection, statement: &Statement) -> rusqlite::Result<()> {
    if statement.params.is_empty() {
        // execute_batch accepts multi-statement scripts.
        conn.execute_batch(&statement.sql)
    } else {
        conn.execute(&statement.sql, params_from_iter(statement.params.iter()))
            .map(|_| ())
    }
}

#[async_trait]
impl SqlBackend for LocalDatabase {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let pool = self.pool.clone();
        let sql = sql.to_owned();
        let params = params.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let affected = conn.execute(&sql, params_from_iter(params.iter()))?;
            Ok::<_, DbError>(affected as u64)
        })
        .await?
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DbError> {
        let pool = self.pool.clone();
        let sql = sql.to_owned();
        let params = params.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();
            let width = columns.len();

            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let mut collected = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for idx in 0..width {
                    values.push(SqlValue::from(row.get_ref(idx)?));
                }
                collected.push(values);
            }

            Ok::<_, DbError>(QueryResult {
                columns,
                rows: collected,
            })
        })
        .await?
    }

    async fn transaction(&self, statements: &[Statement]) -> Result<(), DbError> {
        let pool = self.pool.clone();
        let statements = statements.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            for statement in &statements {
                run_statement(&tx, statement)?;
            }
            tx.commit()?;
            Ok::<_, DbError>(())
        })
        .await?
    }
}
