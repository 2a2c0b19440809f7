use crate::traits::error::HyperSocketError;
use async_trait::async_trait;
use serde_json::Value;

/// Consumer of decoded WebSocket messages.
///
/// The manager decodes each text/binary frame as JSON and forwards only
/// object payloads; anything else is dropped silently. Handlers own their
/// buffers and use interior mutability: the manager holds the handler
/// behind an `Arc` and may call it from its dispatch task at any time.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called for every decoded JSON object received on the connection
    async fn on_message(&self, message: Value);

    /// Called when the connection loop hits an error.
    ///
    /// Errors never terminate the manager; after this hook returns the
    /// manager closes the socket and schedules a reconnect.
    async fn on_error(&self, _error: &HyperSocketError) {}
}
