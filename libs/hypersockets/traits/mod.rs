//! Core traits and types for the HyperSockets WebSocket client.
//!
//! - **HeaderProvider**: generate connection headers (re-evaluated on every
//!   reconnect)
//! - **MessageHandler**: consume decoded JSON messages and connection errors
//! - **ReconnectionStrategy**: control reconnection backoff

pub mod error;
pub mod handler;
pub mod headers;
pub mod reconnect;

// Re-export commonly used types
pub use error::{HyperSocketError, Result};
pub use handler::MessageHandler;
pub use headers::{HeaderProvider, Headers, NoHeaders};
pub use reconnect::{ExponentialBackoff, FixedDelay, ReconnectionStrategy};
