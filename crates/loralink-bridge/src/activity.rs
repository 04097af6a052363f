//! Last-activity timestamp driving the inactivity timeout

use std::time::Duration;
use tokio::time::Instant;

/// Time of the last meaningful activity
///
/// Touched for messages in either direction, phone connections and short
/// button presses. Measured on the monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct ActivityClock {
    last: Instant,
}

impl ActivityClock {
    /// Start the clock with activity at `now`
    pub fn new(now: Instant) -> Self {
        Self { last: now }
    }

    /// Record activity at `now`
    ///
    /// Timestamps earlier than the current one are ignored.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last {
            self.last = now;
        }
    }

    /// Restart the clock at `now`, even if that moves it backwards
    pub fn reset(&mut self, now: Instant) {
        self.last = now;
    }

    /// Time of the last activity
    pub fn last(&self) -> Instant {
        self.last
    }

    /// Time elapsed since the last activity
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last)
    }
}
