use crate::core::config::ManagerConfig;
use crate::core::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
use crate::core::heartbeat::PongTracker;
use crate::core::queue::InboundQueue;
use crate::traits::error::HyperSocketError;
use crate::traits::handler::MessageHandler;
use crate::traits::headers::HeaderProvider;
use crate::traits::reconnect::{ExponentialBackoff, ReconnectionStrategy};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{http, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

/// Outbound commands from callers into the connection loop
#[derive(Debug)]
enum Command {
    /// Send a JSON payload to the socket
    Send(Value),
    /// Close the socket and stop reconnecting
    Close,
}

/// How a single connection ended
enum ConnectionOutcome {
    /// `close()` was called; stop the run loop
    CloseRequested,
    /// The connection failed; `connected` is true when the handshake had
    /// completed before the failure (resets the backoff)
    Failed {
        connected: bool,
        error: HyperSocketError,
    },
}

/// Reconnecting single-connection WebSocket client.
///
/// Owns the subscription replay list: payloads registered through
/// [`subscribe`](Self::subscribe) are re-sent in order after every
/// reconnect. Decoded JSON objects flow through a bounded queue into the
/// configured [`MessageHandler`]; non-object frames are dropped silently.
pub struct WsManager {
    config: ManagerConfig,
    headers: Option<Arc<dyn HeaderProvider>>,
    handler: Arc<dyn MessageHandler>,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
    queue: Arc<InboundQueue>,
    pong: PongTracker,
    subscriptions: Mutex<Vec<Value>>,
    command_tx: UnboundedSender<Command>,
    command_rx: AsyncMutex<Option<UnboundedReceiver<Command>>>,
    running: Arc<AtomicBool>,
}

impl WsManager {
    pub fn new(
        config: ManagerConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> crate::Result<Self> {
        config.validate()?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(InboundQueue::new(config.queue_capacity));
        Ok(Self {
            config,
            headers: None,
            handler,
            state: Arc::new(AtomicConnectionState::new()),
            metrics: Arc::new(AtomicMetrics::new()),
            queue,
            pong: PongTracker::new(),
            subscriptions: Mutex::new(Vec::new()),
            command_tx,
            command_rx: AsyncMutex::new(Some(command_rx)),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Attach a header provider, re-evaluated on every connection attempt.
    pub fn with_headers(mut self, provider: Arc<dyn HeaderProvider>) -> Self {
        self.headers = Some(provider);
        self
    }

    /// Register a subscription payload for replay and send it immediately
    /// when connected.
    pub fn subscribe(&self, payload: Value) {
        self.subscriptions.lock().push(payload.clone());
        if self.state.is_connected() {
            let _ = self.command_tx.send(Command::Send(payload));
        }
    }

    /// Send a one-off JSON payload without adding it to the replay list.
    pub fn send_json(&self, payload: Value) -> crate::Result<()> {
        if !self.state.is_connected() {
            return Err(HyperSocketError::ConnectionClosed("not connected".into()));
        }
        self.command_tx
            .send(Command::Send(payload))
            .map_err(|e| HyperSocketError::ChannelSend(e.to_string()))
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn metrics(&self) -> &AtomicMetrics {
        &self.metrics
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Age of the most recent pong (or connection open) on the current run.
    pub fn pong_age(&self) -> Option<std::time::Duration> {
        self.pong.age()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Stop the run loop and close the socket.
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
        self.state.set(ConnectionState::ShuttingDown);
        let _ = self.command_tx.send(Command::Close);
        self.queue.wake();
    }

    /// Connect / read / reconnect loop. Returns only after [`close`](Self::close).
    pub async fn run(&self) {
        let mut command_rx = match self.command_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!(url = %self.config.url, "ws_run_called_twice");
                return;
            }
        };
        self.running.store(true, Ordering::Release);

        let dispatch = tokio::spawn(dispatch_loop(
            Arc::clone(&self.queue),
            Arc::clone(&self.handler),
            Arc::clone(&self.running),
        ));

        let backoff = ExponentialBackoff::new(
            self.config.reconnect_delay,
            self.config.reconnect_max_delay,
        );
        let mut failures: usize = 0;

        loop {
            if !self.is_running() {
                break;
            }
            self.state.set(if failures == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });

            match self.run_connection(&mut command_rx).await {
                ConnectionOutcome::CloseRequested => break,
                ConnectionOutcome::Failed { connected, error } => {
                    warn!(url = %self.config.url, error = %error, "ws_connection_failed");
                    self.handler.on_error(&error).await;
                    if connected {
                        failures = 0;
                    }
                }
            }
            self.state.set(ConnectionState::Disconnected);
            self.pong.reset();

            if !self.is_running() {
                break;
            }
            let delay = backoff.next_delay(failures);
            info!(
                url = %self.config.url,
                wait_seconds = delay.as_secs_f64(),
                attempt = failures + 1,
                "ws_reconnecting"
            );
            tokio::time::sleep(delay).await;
            failures += 1;
            self.metrics.increment_reconnects();
        }

        self.state.set(ConnectionState::Disconnected);
        self.running.store(false, Ordering::Release);
        self.queue.wake();
        let _ = dispatch.await;
        info!(url = %self.config.url, "ws_manager_stopped");
    }

    async fn run_connection(
        &self,
        command_rx: &mut UnboundedReceiver<Command>,
    ) -> ConnectionOutcome {
        let mut request = match self.config.url.as_str().into_client_request() {
            Ok(request) => request,
            Err(e) => {
                return ConnectionOutcome::Failed {
                    connected: false,
                    error: HyperSocketError::Configuration(e.to_string()),
                }
            }
        };
        if let Some(provider) = &self.headers {
            for (key, value) in provider.get_headers().await {
                match (
                    key.parse::<http::header::HeaderName>(),
                    value.parse::<http::header::HeaderValue>(),
                ) {
                    (Ok(name), Ok(header_value)) => {
                        request.headers_mut().insert(name, header_value);
                    }
                    _ => warn!(header = %key, "ws_invalid_header_skipped"),
                }
            }
        }

        let connection =
            tokio::time::timeout(self.config.connect_timeout, connect_async(request)).await;
        let ws_stream = match connection {
            Err(_) => {
                return ConnectionOutcome::Failed {
                    connected: false,
                    error: HyperSocketError::Timeout(format!(
                        "connect to {}",
                        self.config.url
                    )),
                }
            }
            Ok(Err(error)) => {
                return ConnectionOutcome::Failed {
                    connected: false,
                    error: map_connect_error(error),
                }
            }
            Ok(Ok((stream, _response))) => stream,
        };

        info!(url = %self.config.url, "ws_connected");
        self.state.set(ConnectionState::Connected);
        self.pong.record();

        let (mut write, mut read) = ws_stream.split();

        // Replay buffered subscriptions in registration order.
        let replay: Vec<Value> = self.subscriptions.lock().clone();
        for payload in replay {
            if let Err(e) = write.send(Message::Text(payload.to_string())).await {
                return ConnectionOutcome::Failed {
                    connected: true,
                    error: HyperSocketError::WebSocket(format!(
                        "subscription replay failed: {e}"
                    )),
                };
            }
            self.metrics.increment_sent();
            debug!(url = %self.config.url, "ws_subscription_sent");
        }

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; consume the first tick so the first
        // ping happens one interval after connect.
        heartbeat.tick().await;

        let mut pong_deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.metrics.increment_received();
                        self.enqueue_json(text.as_bytes());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        self.metrics.increment_received();
                        self.enqueue_json(&data);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return ConnectionOutcome::Failed {
                                connected: true,
                                error: HyperSocketError::WebSocket("pong send failed".into()),
                            };
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        self.pong.record();
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Close(_))) => {
                        return ConnectionOutcome::Failed {
                            connected: true,
                            error: HyperSocketError::ConnectionClosed(
                                "close frame received".into(),
                            ),
                        };
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        return ConnectionOutcome::Failed {
                            connected: true,
                            error: HyperSocketError::WebSocket(e.to_string()),
                        };
                    }
                    None => {
                        return ConnectionOutcome::Failed {
                            connected: true,
                            error: HyperSocketError::ConnectionClosed("stream ended".into()),
                        };
                    }
                },

                command = command_rx.recv() => match command {
                    Some(Command::Send(payload)) => {
                        if let Err(e) = write.send(Message::Text(payload.to_string())).await {
                            return ConnectionOutcome::Failed {
                                connected: true,
                                error: HyperSocketError::WebSocket(e.to_string()),
                            };
                        }
                        self.metrics.increment_sent();
                    }
                    Some(Command::Close) | None => {
                        let _ = tokio::time::timeout(
                            self.config.close_timeout,
                            write.close(),
                        )
                        .await;
                        return ConnectionOutcome::CloseRequested;
                    }
                },

                _ = heartbeat.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        return ConnectionOutcome::Failed {
                            connected: true,
                            error: HyperSocketError::WebSocket("ping send failed".into()),
                        };
                    }
                    pong_deadline =
                        Some(tokio::time::Instant::now() + self.config.pong_timeout);
                },

                _ = wait_for_deadline(pong_deadline) => {
                    return ConnectionOutcome::Failed {
                        connected: true,
                        error: HyperSocketError::HeartbeatTimeout(self.config.pong_timeout),
                    };
                },
            }
        }
    }

    /// Decode a frame as JSON and enqueue object payloads only.
    fn enqueue_json(&self, raw: &[u8]) {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value) if value.is_object() => self.queue.push(value),
            Ok(_) => debug!(url = %self.config.url, "ws_non_object_dropped"),
            Err(_) => debug!(url = %self.config.url, "ws_undecodable_dropped"),
        }
    }
}

/// Sleep until the pong deadline, or forever when no ping is outstanding.
async fn wait_for_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Drain the inbound queue into the handler until shutdown.
async fn dispatch_loop(
    queue: Arc<InboundQueue>,
    handler: Arc<dyn MessageHandler>,
    running: Arc<AtomicBool>,
) {
    loop {
        while let Some(message) = queue.pop() {
            handler.on_message(message).await;
        }
        if !running.load(Ordering::Acquire) && queue.is_empty() {
            break;
        }
        let _ = tokio::time::timeout(std::time::Duration::from_millis(200), queue.wait()).await;
    }
}

fn map_connect_error(error: tokio_tungstenite::tungstenite::Error) -> HyperSocketError {
    use tokio_tungstenite::tungstenite::Error;
    match &error {
        Error::Http(response)
            if response.status() == http::StatusCode::UNAUTHORIZED
                || response.status() == http::StatusCode::FORBIDDEN =>
        {
            HyperSocketError::AuthenticationFailed(format!(
                "upgrade rejected with {}",
                response.status()
            ))
        }
        _ => HyperSocketError::WebSocket(error.to_string()),
    }
}
