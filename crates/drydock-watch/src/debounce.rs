//! Timer-based event coalescing.

use std::time::Duration;
use tokio::time::Instant;

/// Collapses bursts of events into a single trigger.
///
/// Every [`record`](Self::record) pushes the deadline to `now + window`.
/// [`poll`](Self::poll) fires once the deadline has passed with no newer
/// event, then clears the pending state. Time is always passed in, so the
/// state machine can be driven by a real or a fake clock.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    /// Creates an idle debouncer with the given quiet window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// The quiet window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records an event observed at `now`, restarting the window.
    pub fn record(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// Whether an event is waiting for its window to elapse.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the pending trigger fires, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` exactly once per burst, when `now` is at or past the
    /// deadline.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Drops any pending trigger.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn burst_within_window_fires_once() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);

        // Five events, each 50ms apart: every one lands inside the window
        // opened by the previous one.
        for i in 0..5 {
            let now = start + Duration::from_millis(50 * i);
            assert!(!debouncer.poll(now));
            debouncer.record(now);
        }

        let last = start + Duration::from_millis(200);
        assert!(!debouncer.poll(last + Duration::from_millis(99)));
        assert!(debouncer.poll(last + WINDOW));
        assert!(!debouncer.poll(last + WINDOW * 2), "fires only once");
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn separated_events_fire_separately() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        let mut fired = 0;

        for i in 0..3 {
            let now = start + Duration::from_millis(500 * i);
            debouncer.record(now);
            if debouncer.poll(now + WINDOW) {
                fired += 1;
            }
        }
        assert_eq!(fired, 3);
    }

    #[test]
    fn idle_debouncer_never_fires() {
        let mut debouncer = Debouncer::new(WINDOW);
        assert!(!debouncer.poll(Instant::now() + Duration::from_secs(60)));
        assert_eq!(debouncer.deadline(), None);
    }

    #[test]
    fn cancel_drops_pending_trigger() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.record(now);
        debouncer.cancel();
        assert!(!debouncer.poll(now + WINDOW));
    }
}
