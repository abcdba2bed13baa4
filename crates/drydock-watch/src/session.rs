//! A single watch subscription on the schema source.

use crate::debounce::Debouncer;
use crate::error::WatchError;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

/// A change observed on the watched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The path reported by the event source.
    pub path: PathBuf,
}

#[derive(Debug, Default)]
struct Shared {
    closed: AtomicBool,
    wake: Notify,
}

/// A cloneable view of a session's open/closed flag.
///
/// Closing through a handle is equivalent to [`WatchSession::close`]: the
/// session stops delivering triggers and drops its watcher the next time it
/// is polled.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Closes the session. Returns `true` if this call closed it.
    pub fn close(&self) -> bool {
        let was_open = !self.shared.closed.swap(true, Ordering::SeqCst);
        if was_open {
            self.shared.wake.notify_one();
        }
        was_open
    }
}

/// One active subscription: a target path, an event source, and a debounce
/// timer.
///
/// Events are produced either by a filesystem watcher
/// ([`subscribe`](Self::subscribe)) or by any channel
/// ([`from_channel`](Self::from_channel)). Events that arrive while the
/// owner is busy stay queued in the channel and are coalesced on the next
/// call to [`next_trigger`](Self::next_trigger).
pub struct WatchSession {
    target: PathBuf,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    debouncer: Debouncer,
    shared: Arc<Shared>,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("target", &self.target)
            .field("debouncer", &self.debouncer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}

impl WatchSession {
    /// Subscribes a filesystem watcher to `target`.
    ///
    /// The parent directory is watched non-recursively and events are
    /// filtered by file name, so editors that save by replacing the file are
    /// still observed.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::WatchSubscription` if the watcher cannot be
    /// created or the directory cannot be watched.
    pub fn subscribe(target: &Path, window: Duration) -> Result<Self, WatchError> {
        let subscription_error = |source: notify::Error| WatchError::WatchSubscription {
            path: target.to_path_buf(),
            source,
        };

        let file_name: OsString = target
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| {
                subscription_error(notify::Error::generic("watch target has no file name"))
            })?;
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if is_relevant(&event.kind) => {
                    for path in event.paths {
                        if path.file_name() == Some(file_name.as_os_str()) {
                            // The receiver is gone once the session closes.
                            let _ = tx.send(ChangeEvent { path });
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "schema watcher reported an error"),
            }
        })
        .map_err(subscription_error)?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(subscription_error)?;

        tracing::info!(path = %target.display(), "watching schema source");

        let mut session = Self::from_channel(target, rx, window);
        session.watcher = Some(watcher);
        Ok(session)
    }

    /// Builds a session fed by an arbitrary event channel.
    pub fn from_channel(
        target: &Path,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        window: Duration,
    ) -> Self {
        Self {
            target: target.to_path_buf(),
            events,
            debouncer: Debouncer::new(window),
            shared: Arc::default(),
            watcher: None,
        }
    }

    /// The watched path.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// A handle observing (and able to close) this session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Closes the session: drops the watcher, the pending trigger and the
    /// event source. Idempotent; returns `true` if this call closed it.
    pub fn close(&mut self) -> bool {
        let was_open = !self.shared.closed.swap(true, Ordering::SeqCst);
        self.release();
        was_open
    }

    fn release(&mut self) {
        self.watcher = None;
        self.debouncer.cancel();
        self.events.close();
    }

    /// Waits for the next debounced trigger.
    ///
    /// Returns the last event of the burst, or `None` once the session is
    /// closed or its event source has ended with nothing pending.
    pub async fn next_trigger(&mut self) -> Option<ChangeEvent> {
        let mut latest: Option<ChangeEvent> = None;

        loop {
            if self.is_closed() {
                self.release();
                return None;
            }

            let shared = Arc::clone(&self.shared);
            match self.debouncer.deadline() {
                None => {
                    tokio::select! {
                        event = self.events.recv() => match event {
                            Some(event) => {
                                self.debouncer.record(Instant::now());
                                latest = Some(event);
                            }
                            None => return None,
                        },
                        () = shared.wake.notified() => {}
                    }
                }
                Some(deadline) => {
                    tokio::select! {
                        event = self.events.recv() => match event {
                            Some(event) => {
                                self.debouncer.record(Instant::now());
                                latest = Some(event);
                            }
                            None => {
                                // Source ended mid-burst; deliver what we have.
                                self.debouncer.cancel();
                                return latest;
                            }
                        },
                        () = tokio::time::sleep_until(deadline) => {
                            if self.debouncer.poll(Instant::now()) {
                                return latest;
                            }
                        }
                        () = shared.wake.notified() => {}
                    }
                }
            }
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    fn event(name: &str) -> ChangeEvent {
        ChangeEvent {
            path: PathBuf::from(name),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_trigger() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = WatchSession::from_channel(Path::new("tables.ts"), rx, WINDOW);

        let producer = tokio::spawn(async move {
            for i in 0..5 {
                tx.send(event(&format!("edit-{i}"))).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tx
        });

        let trigger = session.next_trigger().await.expect("one trigger");
        assert_eq!(trigger, event("edit-4"));

        // Keep the sender alive so the source does not end.
        let _tx = producer.await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), session.next_trigger()).await;
        assert!(second.is_err(), "no further trigger without new events");
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_waits_for_quiet_window() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = WatchSession::from_channel(Path::new("tables.ts"), rx, WINDOW);

        let started = Instant::now();
        tx.send(event("a")).unwrap();
        session.next_trigger().await.expect("trigger");
        assert!(started.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_through_handle_ends_the_session() {
        let (tx, rx) = mpsc::unbounded_channel::<ChangeEvent>();
        let mut session = WatchSession::from_channel(Path::new("tables.ts"), rx, WINDOW);
        let handle = session.handle();

        let waiter = tokio::spawn(async move { session.next_trigger().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(handle.close());
        assert!(!handle.close(), "second close is a no-op");
        assert_eq!(waiter.await.unwrap(), None);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_stops_delivery() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = WatchSession::from_channel(Path::new("tables.ts"), rx, WINDOW);

        assert!(session.close());
        assert!(!session.close());
        let _ = tx.send(event("late"));
        assert_eq!(session.next_trigger().await, None);
    }

    #[tokio::test]
    async fn subscribing_to_missing_directory_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("no").join("such").join("tables.ts");
        let err = WatchSession::subscribe(&target, WINDOW).expect_err("should fail");
        assert!(matches!(err, WatchError::WatchSubscription { .. }));
    }
}
