//! # HyperSockets
//!
//! A small, modular WebSocket client built for long-running market-data
//! feeds.
//!
//! ## Features
//!
//! - **Automatic reconnection**: pluggable backoff strategies, reset on a
//!   successful connection
//! - **Subscription replay**: buffered subscription payloads are re-sent in
//!   order after every reconnect
//! - **Dynamic headers**: auth headers are regenerated on each connection
//!   attempt so signed timestamps stay fresh
//! - **Heartbeat**: protocol pings with a pong deadline; a silent peer
//!   forces a reconnect
//! - **Bounded inbound queue**: overflow drops the oldest message rather
//!   than the connection

pub mod traits;
pub mod core;
pub mod manager;

// Re-export all traits
pub use traits::*;

// Re-export core client functionality
pub use core::{
    config::ManagerConfig,
    connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState},
    heartbeat::PongTracker,
    queue::InboundQueue,
};

// Re-export manager
pub use manager::WsManager;

/// Type alias for Result with HyperSocketError
pub type Result<T> = std::result::Result<T, traits::HyperSocketError>;
