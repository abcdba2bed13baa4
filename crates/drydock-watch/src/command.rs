//! External commands: the migration generator and the optional apply step.

use crate::error::CommandError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments, passed verbatim.
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Creates a command from a program and arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a command from an argv-style list. Returns `None` if the list
    /// is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// What a finished command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if terminated by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` for a zero exit code.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Converts a non-zero exit into `CommandError::Failed`.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::Failed` carrying the captured output.
    pub fn check(self, command: &CommandSpec) -> Result<Self, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::Failed {
                command: command.to_string(),
                status: self.status,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs external commands to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` with `cwd` as its working directory and waits for it.
    ///
    /// A non-zero exit is reported in [`CommandOutput::status`], not as an
    /// error; errors are reserved for commands that could not run at all.
    async fn run(&self, command: &CommandSpec, cwd: &Path) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as child processes, optionally bounded by a timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// A runner that waits indefinitely.
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner that kills commands still running after `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec, cwd: &Path) -> Result<CommandOutput, CommandError> {
        tracing::debug!(command = %command, cwd = %cwd.display(), "running command");

        let child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output();

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child).await.map_err(|_| {
                CommandError::Timeout {
                    command: command.to_string(),
                    timeout,
                }
            })?,
            None => child.await,
        }
        .map_err(|source| CommandError::Spawn {
            command: command.to_string(),
            source,
        })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("npx", ["drizzle-kit", "generate:sqlite"]);
        assert_eq!(spec.to_string(), "npx drizzle-kit generate:sqlite");
    }

    #[test]
    fn from_argv_requires_a_program() {
        assert_eq!(CommandSpec::from_argv(&[]), None);
        assert_eq!(
            CommandSpec::from_argv(&["make".to_string(), "migrate".to_string()]),
            Some(CommandSpec::new("make", ["migrate"]))
        );
    }

    #[test]
    fn check_turns_nonzero_exit_into_failure() {
        let spec = CommandSpec::new("gen", Vec::<String>::new());
        let output = CommandOutput {
            status: Some(2),
            stdout: "partial".into(),
            stderr: "boom".into(),
        };
        match output.check(&spec) {
            Err(CommandError::Failed {
                status, stderr, ..
            }) => {
                assert_eq!(status, Some(2));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = CommandSpec::new("drydock-definitely-not-installed", ["x"]);
        let err = ProcessRunner::new()
            .run(&spec, dir.path())
            .await
            .expect_err("should not start");
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_output_in_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let spec = CommandSpec::new("sh", ["-c", "cat marker.txt; echo oops >&2; exit 3"]);

        let output = ProcessRunner::new()
            .run(&spec, dir.path())
            .await
            .expect("should run");
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout, "here");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_long_running_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = CommandSpec::new("sleep", ["5"]);
        let err = ProcessRunner::with_timeout(Some(Duration::from_millis(100)))
            .run(&spec, dir.path())
            .await
            .expect_err("should time out");
        assert!(matches!(err, CommandError::Timeout { .. }));
    }
}
