use crate::traits::error::{HyperSocketError, Result};
use std::time::Duration;

/// Minimum inbound queue capacity.
pub const MIN_QUEUE_CAPACITY: usize = 4096;

/// Configuration for a [`WsManager`](crate::manager::WsManager)
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// WebSocket URL to connect to
    pub url: String,
    /// Interval between protocol pings
    pub heartbeat_interval: Duration,
    /// How long after a ping a pong must arrive before the connection is
    /// considered dead
    pub pong_timeout: Duration,
    /// Initial reconnect delay (doubled per consecutive failure)
    pub reconnect_delay: Duration,
    /// Upper bound on the reconnect delay
    pub reconnect_max_delay: Duration,
    /// Budget for the TCP/TLS/upgrade handshake
    pub connect_timeout: Duration,
    /// Budget for the closing handshake during shutdown
    pub close_timeout: Duration,
    /// Capacity of the inbound message queue (oldest dropped on overflow)
    pub queue_capacity: usize,
}

impl ManagerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            queue_capacity: MIN_QUEUE_CAPACITY,
        }
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        // 5s floor
        self.heartbeat_interval = interval.max(Duration::from_secs(5));
        self
    }

    pub fn reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial.max(Duration::from_millis(500));
        self.reconnect_max_delay = max.max(self.reconnect_delay);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(MIN_QUEUE_CAPACITY);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(HyperSocketError::Configuration("url cannot be empty".into()));
        }
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(HyperSocketError::Configuration(format!(
                "url must use ws:// or wss:// scheme: {}",
                self.url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ManagerConfig::new("wss://example.com/ws");
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, MIN_QUEUE_CAPACITY);
        assert_eq!(config.pong_timeout, Duration::from_secs(10));
    }

    #[test]
    fn rejects_non_ws_urls() {
        assert!(ManagerConfig::new("https://example.com").validate().is_err());
        assert!(ManagerConfig::new("").validate().is_err());
    }

    #[test]
    fn floors_are_enforced() {
        let config = ManagerConfig::new("wss://example.com")
            .heartbeat_interval(Duration::from_secs(1))
            .queue_capacity(16)
            .reconnect_delays(Duration::from_millis(1), Duration::from_millis(1));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, MIN_QUEUE_CAPACITY);
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.reconnect_max_delay, Duration::from_millis(500));
    }
}
