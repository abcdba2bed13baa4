//! Applies generated migration journals to a live backend.
//!
//! The generator writes `meta/_journal.json` plus one `<tag>.sql` file per
//! migration into the migrations directory. Statements inside a file are
//! separated by [`BREAKPOINT_MARKER`]. Applied migrations are tracked in the
//! `__drizzle_migrations` table by content hash and journal timestamp; a
//! migration runs only if its timestamp is newer than the last recorded one.
//! Everything pending is applied as a single batch.

use crate::backend::{SqlBackend, Statement};
use crate::error::MigrationApplyError;
use crate::value::SqlValue;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Separator the generator places between statements when breakpoints are
/// enabled.
pub const BREAKPOINT_MARKER: &str = "--> statement-breakpoint";

const JOURNAL_PATH: &str = "meta/_journal.json";

#[derive(Debug, Deserialize)]
struct Journal {
    #[serde(default)]
    entries: Vec<JournalEntry>,
}

#[derive(Debug, Deserialize)]
struct JournalEntry {
    when: i64,
    tag: String,
}

/// One migration read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Journal tag, also the SQL file stem.
    pub tag: String,
    /// Journal timestamp in milliseconds; used as `created_at`.
    pub created_at: i64,
    /// SHA-256 of the SQL file contents, hex encoded.
    pub hash: String,
    /// Statements in file order, breakpoints removed.
    pub statements: Vec<String>,
}

fn read_file(path: &Path) -> Result<String, MigrationApplyError> {
    std::fs::read_to_string(path).map_err(|source| MigrationApplyError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn split_statements(sql: &str) -> Vec<String> {
    sql.split(BREAKPOINT_MARKER)
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(String::from)
        .collect()
}

/// Reads every migration listed in the journal under `dir`, in journal order.
///
/// A missing journal means nothing has been generated yet and yields an empty
/// list.
///
/// # Errors
///
/// Returns `MigrationApplyError::Read` or `MigrationApplyError::Journal` if a
/// listed file is unreadable or the journal is malformed.
pub fn read_migrations(dir: &Path) -> Result<Vec<MigrationFile>, MigrationApplyError> {
    let journal_path: PathBuf = dir.join(JOURNAL_PATH);
    if !journal_path.exists() {
        tracing::debug!(path = %journal_path.display(), "no migration journal found");
        return Ok(Vec::new());
    }

    let journal: Journal =
        serde_json::from_str(&read_file(&journal_path)?).map_err(|source| {
            MigrationApplyError::Journal {
                path: journal_path.clone(),
                source,
            }
        })?;

    journal
        .entries
        .into_iter()
        .map(|entry| {
            let sql = read_file(&dir.join(format!("{}.sql", entry.tag)))?;
            Ok(MigrationFile {
                hash: hex::encode(Sha256::digest(sql.as_bytes())),
                statements: split_statements(&sql),
                created_at: entry.when,
                tag: entry.tag,
            })
        })
        .collect()
}

/// Applies pending migrations from `dir` to `db`.
///
/// All pending migrations and their tracking rows run in one transaction, so
/// a failure leaves none of the batch applied.
///
/// # Errors
///
/// Returns `MigrationApplyError` if the journal cannot be read, the tracking
/// table cannot be queried, or a migration fails.
pub async fn apply_migrations(
    db: &dyn SqlBackend,
    dir: &Path,
) -> Result<usize, MigrationApplyError> {
    let migrations = read_migrations(dir)?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS \"__drizzle_migrations\" (
            id INTEGER PRIMARY KEY,
            hash TEXT NOT NULL,
            created_at NUMERIC
        )",
        &[],
    )
    .await
    .map_err(MigrationApplyError::StateQuery)?;

    let last = db
        .query(
            "SELECT created_at FROM \"__drizzle_migrations\" ORDER BY created_at DESC LIMIT 1",
            &[],
        )
        .await
        .map_err(MigrationApplyError::StateQuery)?;
    let last_applied = last.first_value().and_then(SqlValue::as_i64);

    let pending: Vec<MigrationFile> = migrations
        .into_iter()
        .filter(|migration| {
            let done = last_applied.is_some_and(|last| migration.created_at <= last);
            if done {
                tracing::debug!(migration = %migration.tag, "migration already applied, skipping");
            }
            !done
        })
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let mut statements: Vec<Statement> = Vec::new();
    for migration in &pending {
        tracing::info!(migration = %migration.tag, "applying migration");
        statements.extend(
            migration
                .statements
                .iter()
                .map(|sql| Statement::new(sql.clone())),
        );
        statements.push(Statement::with_params(
            "INSERT INTO \"__drizzle_migrations\" (hash, created_at) VALUES (?1, ?2)",
            vec![
                SqlValue::Text(migration.hash.clone()),
                SqlValue::Integer(migration.created_at),
            ],
        ));
    }

    db.transaction(&statements)
        .await
        .map_err(|source| MigrationApplyError::ExecutionFailed {
            tags: pending.iter().map(|m| m.tag.clone()).collect(),
            source,
        })?;

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_statements_drops_markers_and_blank_chunks() {
        let sql = "CREATE TABLE a (id integer);\n--> statement-breakpoint\nCREATE TABLE b (id integer);\n--> statement-breakpoint\n";
        assert_eq!(
            split_statements(sql),
            vec!["CREATE TABLE a (id integer);", "CREATE TABLE b (id integer);"]
        );
    }

    #[test]
    fn read_migrations_without_journal_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(read_migrations(dir.path()).expect("read").is_empty());
    }

    #[test]
    fn read_migrations_rejects_malformed_journal() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("meta")).unwrap();
        std::fs::write(dir.path().join(JOURNAL_PATH), "{ not json").unwrap();

        let err = read_migrations(dir.path()).expect_err("should fail");
        assert!(matches!(err, MigrationApplyError::Journal { .. }));
    }

    #[test]
    fn read_migrations_reports_missing_sql_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("meta")).unwrap();
        std::fs::write(
            dir.path().join(JOURNAL_PATH),
            r#"{"version":"5","dialect":"sqlite","entries":[{"idx":0,"version":"5","when":1,"tag":"0000_gone","breakpoints":true}]}"#,
        )
        .unwrap();

        let err = read_migrations(dir.path()).expect_err("should fail");
        match err {
            MigrationApplyError::Read { path, .. } => {
                assert!(path.ends_with("0000_gone.sql"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
