//! Heartbeat timing for periodic work inside long-running loops.

use std::time::{Duration, Instant};

/// Tracks whether an interval has elapsed since the last beat.
///
/// The runtime's supervise loop uses this to emit its periodic status
/// line without a dedicated timer task.
pub struct Heartbeat {
    interval: Duration,
    last_beat: Instant,
}

impl Heartbeat {
    /// Create a new heartbeat with the given interval in seconds
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            last_beat: Instant::now(),
        }
    }

    /// Check if enough time has passed since the last beat
    pub fn should_beat(&self) -> bool {
        self.last_beat.elapsed() >= self.interval
    }

    /// Record a beat at the current time
    pub fn beat(&mut self) {
        self.last_beat = Instant::now();
    }
}
