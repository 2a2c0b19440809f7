use std::time::Duration;

/// Trait for defining reconnection strategies
///
/// Implement this trait to control how the client should behave when
/// reconnecting after a disconnection.
pub trait ReconnectionStrategy: Send + Sync {
    /// Get the delay before the next reconnection attempt
    ///
    /// `attempt` is the number of consecutive failures so far (0-indexed).
    fn next_delay(&self, attempt: usize) -> Duration;
}

/// Exponential backoff reconnection strategy
///
/// Delays between reconnection attempts grow exponentially:
/// `initial_delay * 2^attempt`, capped at `max_delay`. The manager resets
/// the attempt counter after every successful connection.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        let initial_delay = initial_delay.max(Duration::from_millis(500));
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: usize) -> Duration {
        let shift = attempt.min(16) as u32;
        let millis = (self.initial_delay.as_millis() as u64).saturating_mul(1u64 << shift);
        Duration::from_millis(millis.min(self.max_delay.as_millis() as u64))
    }
}

/// Fixed delay reconnection strategy
///
/// Always waits the same amount of time between reconnection attempts.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&self, _attempt: usize) -> Duration {
        self.delay
    }
}
