//! Kalshi order-book feed.
//!
//! Maintains per-ticker books from snapshot and delta messages, forwards
//! market-lifecycle events to the runtime over a channel, and signs the
//! upgrade with fresh headers on every reconnect.

use crate::domain::orderbook::{normalize_levels, BookState, LevelChange, OrderBookLevels};
use crate::infrastructure::client::KalshiClient;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use hypersockets::{HeaderProvider, Headers, ManagerConfig, MessageHandler, WsManager};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

const KALSHI_WS_PATH: &str = "/trade-api/ws/v2";

/// A market-lifecycle message forwarded for the runtime to act on
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub ticker: String,
    pub payload: Value,
}

struct SignedHeaders {
    client: Arc<KalshiClient>,
}

#[async_trait::async_trait]
impl HeaderProvider for SignedHeaders {
    async fn get_headers(&self) -> Headers {
        match self.client.auth_headers("GET", KALSHI_WS_PATH) {
            Ok(headers) => headers,
            Err(e) => {
                warn!(error = %e, "kalshi_ws_auth_headers_failed");
                Headers::new()
            }
        }
    }
}

struct KalshiBookHandler {
    books: Arc<DashMap<String, BookState>>,
    lifecycle_tx: Sender<LifecycleEvent>,
}

impl KalshiBookHandler {
    fn handle_snapshot(&self, message: &Value) {
        let ticker = match message_ticker(message) {
            Some(ticker) => ticker,
            None => return,
        };
        let yes = normalize_levels(
            message
                .get("yes")
                .or_else(|| message.get("yes_levels"))
                .unwrap_or(&Value::Null),
        );
        let no = normalize_levels(
            message
                .get("no")
                .or_else(|| message.get("no_levels"))
                .unwrap_or(&Value::Null),
        );
        let seq = message.get("seq").and_then(Value::as_u64);
        let mut state = self.books.entry(ticker).or_default();
        state.apply_snapshot(&yes, &no, seq, Utc::now());
    }

    fn handle_delta(&self, message: &Value) {
        let ticker = match message_ticker(message) {
            Some(ticker) => ticker,
            None => return,
        };
        let yes = parse_level_changes(message.get("yes"));
        let no = parse_level_changes(message.get("no"));
        if yes.is_empty() && no.is_empty() {
            return;
        }
        let seq = message.get("seq").and_then(Value::as_u64);
        let mut state = self.books.entry(ticker).or_default();
        state.apply_delta(&yes, &no, seq, Utc::now());
    }

    fn handle_ticker(&self, message: &Value) {
        let ticker = match message_ticker(message) {
            Some(ticker) => ticker,
            None => return,
        };
        let yes_bid = message.get("yes_bid").and_then(Value::as_i64);
        let yes_ask = message
            .get("yes_ask")
            .and_then(Value::as_i64)
            .or_else(|| {
                message
                    .get("no_bid")
                    .and_then(Value::as_i64)
                    .map(|no_bid| 100 - no_bid)
            });
        let mut state = self.books.entry(ticker).or_default();
        state.set_best_prices(yes_bid, yes_ask, Utc::now());
    }

    fn handle_lifecycle(&self, message: &Value) {
        let ticker = match message_ticker(message) {
            Some(ticker) => ticker,
            None => return,
        };
        // Dropped only if the runtime's drain task is gone.
        let _ = self.lifecycle_tx.send(LifecycleEvent {
            ticker,
            payload: message.clone(),
        });
    }
}

#[async_trait::async_trait]
impl MessageHandler for KalshiBookHandler {
    async fn on_message(&self, message: Value) {
        let msg_type = message
            .get("type")
            .or_else(|| message.get("msg_type"))
            .or_else(|| message.get("channel"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        if msg_type.contains("snapshot") {
            self.handle_snapshot(&message);
        } else if msg_type.contains("delta") {
            self.handle_delta(&message);
        } else if msg_type.contains("ticker") {
            self.handle_ticker(&message);
        } else if msg_type.contains("lifecycle") {
            self.handle_lifecycle(&message);
        } else {
            debug!(msg_type = %msg_type, "kalshi_ws_ignored_message");
        }
    }
}

fn message_ticker(message: &Value) -> Option<String> {
    let ticker = message
        .get("market_ticker")
        .or_else(|| message.get("ticker"))
        .and_then(Value::as_str)?
        .trim()
        .to_string();
    if ticker.is_empty() {
        return None;
    }
    Some(ticker)
}

fn parse_level_changes(raw: Option<&Value>) -> Vec<LevelChange> {
    let rows = match raw.and_then(Value::as_array) {
        Some(rows) => rows,
        None => return Vec::new(),
    };
    let mut changes = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(object) = row.as_object() {
            let price = match object.get("price").and_then(Value::as_i64) {
                Some(price) => price,
                None => continue,
            };
            let delta = object.get("delta").and_then(Value::as_i64);
            let quantity = object
                .get("quantity")
                .and_then(Value::as_i64)
                .or_else(|| object.get("qty").and_then(Value::as_i64));
            if delta.is_none() && quantity.is_none() {
                continue;
            }
            changes.push(LevelChange {
                price,
                delta,
                quantity,
            });
        } else if let Some(pair) = row.as_array() {
            // Pair rows carry a relative delta.
            if let (Some(price), Some(delta)) = (
                pair.first().and_then(Value::as_i64),
                pair.get(1).and_then(Value::as_i64),
            ) {
                changes.push(LevelChange {
                    price,
                    delta: Some(delta),
                    quantity: None,
                });
            }
        }
    }
    changes
}

/// Authenticated order-book feed
pub struct KalshiFeed {
    manager: Arc<WsManager>,
    books: Arc<DashMap<String, BookState>>,
    subscribed: Mutex<HashSet<String>>,
}

impl KalshiFeed {
    /// Create the feed and the lifecycle receiver the runtime drains.
    pub fn new(client: Arc<KalshiClient>) -> (Self, Receiver<LifecycleEvent>) {
        let ws_url = crate::infrastructure::client::build_ws_url(client.base_url());
        let books: Arc<DashMap<String, BookState>> = Arc::new(DashMap::new());
        let (lifecycle_tx, lifecycle_rx) = unbounded();
        let handler = Arc::new(KalshiBookHandler {
            books: Arc::clone(&books),
            lifecycle_tx,
        });
        let manager = Arc::new(
            WsManager::new(ManagerConfig::new(&ws_url), handler)
                .expect("derived ws URL must be valid")
                .with_headers(Arc::new(SignedHeaders { client })),
        );
        (
            Self {
                manager,
                books,
                subscribed: Mutex::new(HashSet::new()),
            },
            lifecycle_rx,
        )
    }

    /// Subscribe to one market's book and ticker channels.
    pub fn subscribe_market(&self, ticker: &str) {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() || !self.subscribed.lock().insert(ticker.clone()) {
            return;
        }
        self.manager.subscribe(json!({
            "cmd": "subscribe",
            "channels": ["orderbook_delta", "ticker"],
            "market_tickers": [ticker],
        }));
    }

    /// Subscribe to market lifecycle events (new tickers, settlements).
    pub fn subscribe_lifecycle(&self) {
        self.manager.subscribe(json!({
            "cmd": "subscribe",
            "channels": ["market_lifecycle_v2"],
            "market_tickers": [],
        }));
    }

    pub fn subscribed_tickers(&self) -> Vec<String> {
        self.subscribed.lock().iter().cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn has_orderbook(&self, ticker: &str) -> bool {
        self.books
            .get(ticker)
            .map(|state| !state.is_empty())
            .unwrap_or(false)
    }

    pub fn orderbook_age_seconds(&self, ticker: &str) -> Option<f64> {
        self.books
            .get(ticker)
            .map(|state| state.age_seconds(Utc::now()))
    }

    pub fn orderbook(&self, ticker: &str) -> Option<OrderBookLevels> {
        self.books.get(ticker).map(|state| state.levels())
    }

    pub fn best_bid_ask(&self, ticker: &str) -> (Option<i64>, Option<i64>) {
        match self.books.get(ticker) {
            Some(state) => (state.best_yes_bid(), state.best_yes_ask()),
            None => (None, None),
        }
    }

    pub async fn run(&self) {
        self.manager.run().await;
    }

    pub fn close(&self) {
        self.manager.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::Settings;

    /// Handler wired to a fresh feed's book map plus a test-owned
    /// lifecycle channel.
    fn test_feed() -> (KalshiFeed, Receiver<LifecycleEvent>, KalshiBookHandler) {
        let client = Arc::new(KalshiClient::new(&Settings::default()).unwrap());
        let (feed, _feed_rx) = KalshiFeed::new(client);
        let (lifecycle_tx, lifecycle_rx) = unbounded();
        let handler = KalshiBookHandler {
            books: Arc::clone(&feed.books),
            lifecycle_tx,
        };
        (feed, lifecycle_rx, handler)
    }

    fn block_on(handler: &KalshiBookHandler, message: Value) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(handler.on_message(message));
    }

    #[test]
    fn snapshot_then_delta_updates_best_prices() {
        let (feed, _rx, handler) = test_feed();
        block_on(
            &handler,
            json!({
                "type": "orderbook_snapshot",
                "market_ticker": "KXHIGHNY-A",
                "seq": 5,
                "yes": [[40, 10], [39, 5]],
                "no": [[55, 8]],
            }),
        );
        assert!(feed.has_orderbook("KXHIGHNY-A"));
        assert_eq!(feed.best_bid_ask("KXHIGHNY-A"), (Some(40), Some(45)));

        block_on(
            &handler,
            json!({
                "type": "orderbook_delta",
                "market_ticker": "KXHIGHNY-A",
                "seq": 6,
                "yes": [{"price": 41, "delta": 3}],
                "no": [{"price": 55, "delta": -8}],
            }),
        );
        assert_eq!(feed.best_bid_ask("KXHIGHNY-A"), (Some(41), None));

        // Stale delta must not regress the book.
        block_on(
            &handler,
            json!({
                "type": "orderbook_delta",
                "market_ticker": "KXHIGHNY-A",
                "seq": 6,
                "yes": [{"price": 48, "delta": 1}],
            }),
        );
        assert_eq!(feed.best_bid_ask("KXHIGHNY-A"), (Some(41), None));
    }

    #[test]
    fn ticker_messages_refresh_best_price_cache() {
        let (feed, _rx, handler) = test_feed();
        block_on(
            &handler,
            json!({
                "type": "ticker",
                "market_ticker": "KXBTC15M-1",
                "yes_bid": 47,
                "no_bid": 51,
            }),
        );
        assert_eq!(feed.best_bid_ask("KXBTC15M-1"), (Some(47), Some(49)));
    }

    #[test]
    fn lifecycle_messages_reach_the_channel() {
        let (_feed, lifecycle_rx, handler) = test_feed();
        block_on(
            &handler,
            json!({
                "type": "market_lifecycle_v2",
                "market_ticker": "KXHIGHNY-NEW-B89",
                "status": "open",
            }),
        );
        let event = lifecycle_rx.try_recv().unwrap();
        assert_eq!(event.ticker, "KXHIGHNY-NEW-B89");
        assert_eq!(event.payload["status"], "open");
    }

    #[test]
    fn duplicate_subscriptions_are_not_replayed_twice() {
        let client = Arc::new(KalshiClient::new(&Settings::default()).unwrap());
        let (feed, _rx) = KalshiFeed::new(client);
        feed.subscribe_market("kxhighny-a");
        feed.subscribe_market("KXHIGHNY-A");
        feed.subscribe_lifecycle();
        assert_eq!(feed.subscribed_tickers().len(), 1);
    }
}
