//! Files the workflow guarantees exist before watching starts.

use crate::error::WatchError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Contents written to a schema source that does not exist yet.
pub const SCHEMA_STUB: &str =
    "import { sqliteTable, text, integer } from 'drizzle-orm/sqlite-core'\n";

/// The migration-tool configuration artifact.
///
/// Serialized as `{"out": ..., "schema": ..., "breakpoints": true}` with
/// both paths relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationToolConfig {
    /// Migrations output directory.
    pub out: String,
    /// Schema source file.
    pub schema: String,
    /// Whether generated migrations carry statement breakpoints. Always set.
    pub breakpoints: bool,
}

impl MigrationToolConfig {
    /// Builds the artifact for `root`, expressing both paths relative to it.
    pub fn new(root: &Path, migrations_dir: &Path, schema_path: &Path) -> Self {
        Self {
            out: relative_to(root, migrations_dir),
            schema: relative_to(root, schema_path),
            breakpoints: true,
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Renders `path` relative to `root` with `/` separators.
///
/// Relative inputs are taken as already relative to `root`. A relative
/// `root` is anchored at the working directory when `path` is absolute.
/// Paths outside `root` are walked up to with `..` when both share a prefix.
pub fn relative_to(root: &Path, path: &Path) -> String {
    let root = if root.is_relative() && path.is_absolute() {
        normalize(&std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf()))
    } else {
        normalize(root)
    };
    let path = if path.is_absolute() || (root.is_relative() && path.starts_with(&root)) {
        normalize(path)
    } else {
        normalize(&root.join(path))
    };

    let root_parts: Vec<_> = root.components().collect();
    let path_parts: Vec<_> = path.components().collect();
    let shared = root_parts
        .iter()
        .zip(&path_parts)
        .take_while(|(a, b)| a == b)
        .count();

    if shared == 0 && (root.has_root() || path.has_root()) {
        // Nothing in common (e.g. another drive); keep it absolute.
        return path.to_string_lossy().replace('\\', "/");
    }

    let mut parts: Vec<String> = Vec::new();
    parts.extend(std::iter::repeat("..".to_string()).take(root_parts.len() - shared));
    parts.extend(
        path_parts[shared..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Writes `config` as pretty JSON to `root/file_name`, replacing any existing
/// file.
///
/// # Errors
///
/// Returns `WatchError::Prepare` if the file cannot be written.
pub fn write_tool_config(
    root: &Path,
    file_name: &str,
    config: &MigrationToolConfig,
) -> Result<PathBuf, WatchError> {
    let path = root.join(file_name);
    let contents = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, contents).map_err(|source| WatchError::Prepare {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Creates the schema source with [`SCHEMA_STUB`] if it does not exist.
///
/// Returns `true` if the file was created.
///
/// # Errors
///
/// Returns `WatchError::Prepare` if the file or its parent directories cannot
/// be created.
pub fn ensure_schema_source(path: &Path) -> Result<bool, WatchError> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| WatchError::Prepare {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, SCHEMA_STUB).map_err(|source| WatchError::Prepare {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(true)
}
