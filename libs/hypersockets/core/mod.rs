//! Core building blocks shared by the manager: configuration, connection
//! state, the bounded inbound queue, and heartbeat tracking.

pub mod config;
pub mod connection_state;
pub mod heartbeat;
pub mod queue;

pub use config::ManagerConfig;
pub use connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
pub use heartbeat::PongTracker;
pub use queue::InboundQueue;
