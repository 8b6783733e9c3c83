//! Last user activity, for idle detection.

use showcase_types::{Clock, Timestamp};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Records when the user last interacted with the page.
///
/// The host reports clicks, key presses, pointer moves and scrolls through
/// [`ActivityTracker::record_activity`].
pub struct ActivityTracker {
    last_activity: AtomicU64,
    clock: Arc<dyn Clock>,
    idle_timeout: Duration,
}

impl ActivityTracker {
    pub fn new(clock: Arc<dyn Clock>, idle_timeout: Duration) -> Self {
        Self {
            last_activity: AtomicU64::new(clock.now().as_millis()),
            clock,
            idle_timeout,
        }
    }

    pub fn record_activity(&self) {
        self.last_activity
            .store(self.clock.now().as_millis(), Ordering::SeqCst);
    }

    pub fn last_activity(&self) -> Timestamp {
        Timestamp::from_millis(self.last_activity.load(Ordering::SeqCst))
    }

    /// Milliseconds since the last activity.
    pub fn idle_for_ms(&self) -> u64 {
        self.clock.now().saturating_elapsed_since(self.last_activity())
    }

    pub fn is_idle(&self) -> bool {
        self.idle_for_ms() > self.idle_timeout.as_millis() as u64
    }

    /// Records activity and reports whether the user had been idle until
    /// now.
    pub fn reactivate(&self) -> bool {
        let was_idle = self.is_idle();
        self.record_activity();
        was_idle
    }
}
