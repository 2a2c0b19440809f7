use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Tracks pong receipt times for heartbeat supervision.
///
/// The manager records an implicit "pong" when the connection opens and on
/// every pong frame. The heartbeat tick checks `age()` against the pong
/// timeout; exceeding it forces a close so the outer loop reconnects.
#[derive(Debug)]
pub struct PongTracker {
    last_pong: Mutex<Option<Instant>>,
}

impl PongTracker {
    pub fn new() -> Self {
        Self {
            last_pong: Mutex::new(None),
        }
    }

    /// Record a pong (or connection open) at the current instant.
    pub fn record(&self) {
        *self.last_pong.lock() = Some(Instant::now());
    }

    /// Clear state between connections.
    pub fn reset(&self) {
        *self.last_pong.lock() = None;
    }

    /// Time since the most recent pong, if one has been seen.
    pub fn age(&self) -> Option<Duration> {
        self.last_pong.lock().map(|at| at.elapsed())
    }

    /// True when a pong has been seen and is older than `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        matches!(self.age(), Some(age) if age > timeout)
    }
}

impl Default for PongTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tracker_is_never_stale() {
        let tracker = PongTracker::new();
        assert!(tracker.age().is_none());
        assert!(!tracker.is_stale(Duration::from_secs(0)));
    }

    #[test]
    fn recorded_pong_ages() {
        let tracker = PongTracker::new();
        tracker.record();
        assert!(tracker.age().unwrap() < Duration::from_secs(1));
        assert!(!tracker.is_stale(Duration::from_secs(10)));
        assert!(tracker.is_stale(Duration::from_nanos(0)));
        tracker.reset();
        assert!(tracker.age().is_none());
    }
}
