//! Restart signalling between the schema watcher, the server, and the
//! supervising parent process.

use drydock_watch::RestartHook;
use std::ffi::OsString;
use std::path::PathBuf;
use tokio::sync::watch;

/// Exit code a server uses to ask its supervisor for a relaunch.
///
/// `EX_TEMPFAIL` from `sysexits.h`.
pub const RESTART_EXIT_CODE: i32 = 75;

/// Creates a connected restart hook and signal.
pub fn restart_channel() -> (ChannelRestartHook, RestartSignal) {
    let (tx, rx) = watch::channel(false);
    (ChannelRestartHook { tx }, RestartSignal { rx })
}

/// Restart hook that flips a watch channel.
#[derive(Debug, Clone)]
pub struct ChannelRestartHook {
    tx: watch::Sender<bool>,
}

impl RestartHook for ChannelRestartHook {
    fn request_restart(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("restart requested");
        }
    }
}

/// The receiving side of [`restart_channel`].
#[derive(Debug, Clone)]
pub struct RestartSignal {
    rx: watch::Receiver<bool>,
}

impl RestartSignal {
    /// Whether a restart has been requested.
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a restart is requested. Never resolves if every hook is
    /// dropped first.
    pub async fn requested(&mut self) {
        let closed = self.rx.wait_for(|requested| *requested).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Relaunches a child server for as long as it exits with
/// [`RESTART_EXIT_CODE`].
#[derive(Debug, Clone)]
pub struct Supervisor {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl Supervisor {
    /// Supervises `program` run with `args`.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
        }
    }

    /// Sets an environment variable for every launch.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Runs the child until it exits with anything other than the restart
    /// code, and returns that exit code. A child killed by a signal counts as
    /// exit code 1.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the child cannot be spawned.
    pub async fn run(&self) -> std::io::Result<i32> {
        let mut launches: u32 = 0;
        loop {
            launches += 1;
            tracing::debug!(program = %self.program.display(), launches, "launching server");

            let status = tokio::process::Command::new(&self.program)
                .args(&self.args)
                .envs(self.envs.iter().map(|(k, v)| (k, v)))
                .kill_on_drop(true)
                .status()
                .await?;

            match status.code() {
                Some(RESTART_EXIT_CODE) => {
                    tracing::info!(launches, "server requested a restart, relaunching");
                }
                Some(code) => return Ok(code),
                None => {
                    tracing::warn!("server terminated by a signal");
                    return Ok(1);
                }
            }
        }
    }
}
