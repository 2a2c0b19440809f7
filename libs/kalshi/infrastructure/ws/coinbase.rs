//! Coinbase ticker feed.

use super::SpotFeedView;
use chrono::{DateTime, Utc};
use hypersockets::{ManagerConfig, MessageHandler, WsManager};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;

const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
const TICK_CAPACITY: usize = 5000;

#[derive(Debug, Clone, Copy)]
pub struct QuoteTick {
    pub ts: DateTime<Utc>,
    pub price: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
}

#[derive(Default)]
struct TickBuffer {
    ticks: VecDeque<QuoteTick>,
    last_update: Option<DateTime<Utc>>,
}

struct CoinbaseHandler {
    buffer: Arc<RwLock<TickBuffer>>,
}

#[async_trait::async_trait]
impl MessageHandler for CoinbaseHandler {
    async fn on_message(&self, message: Value) {
        match message.get("type").and_then(Value::as_str) {
            Some("ticker") => {}
            // Subscription acks and heartbeats carry no quote.
            _ => return,
        }
        let price = match message.get("price").and_then(parse_number) {
            Some(price) if price > 0.0 => price,
            _ => return,
        };
        let ts = message
            .get("time")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw.replace('Z', "+00:00")).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let best_bid = message.get("best_bid").and_then(parse_number);
        let best_ask = message.get("best_ask").and_then(parse_number);

        let mut buffer = self.buffer.write();
        if buffer.ticks.len() >= TICK_CAPACITY {
            buffer.ticks.pop_front();
        }
        buffer.ticks.push_back(QuoteTick {
            ts,
            price,
            best_bid,
            best_ask,
        });
        buffer.last_update = Some(ts);
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    if let Some(v) = value.as_f64() {
        return Some(v);
    }
    value.as_str().and_then(|s| s.parse().ok())
}

/// BTC-USD ticker feed
pub struct CoinbaseFeed {
    manager: Arc<WsManager>,
    buffer: Arc<RwLock<TickBuffer>>,
}

impl CoinbaseFeed {
    pub fn new() -> Self {
        Self::with_url(COINBASE_WS_URL)
    }

    pub fn with_url(url: &str) -> Self {
        let buffer = Arc::new(RwLock::new(TickBuffer::default()));
        let handler = Arc::new(CoinbaseHandler {
            buffer: Arc::clone(&buffer),
        });
        let manager = Arc::new(
            WsManager::new(ManagerConfig::new(url), handler)
                .expect("feed URL must be a valid ws(s) URL"),
        );
        // Registered before run(); replayed on every (re)connect.
        manager.subscribe(json!({
            "type": "subscribe",
            "product_ids": ["BTC-USD"],
            "channels": ["ticker"],
        }));
        Self { manager, buffer }
    }

    pub async fn run(&self) {
        self.manager.run().await;
    }

    pub fn close(&self) {
        self.manager.close();
    }

    pub fn latest_quote(&self) -> Option<QuoteTick> {
        self.buffer.read().ticks.back().copied()
    }
}

impl Default for CoinbaseFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl SpotFeedView for CoinbaseFeed {
    fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    fn age_seconds(&self) -> f64 {
        match self.buffer.read().last_update {
            Some(ts) => (Utc::now() - ts).num_milliseconds().max(0) as f64 / 1000.0,
            None => f64::INFINITY,
        }
    }

    fn latest_price(&self) -> Option<f64> {
        self.buffer.read().ticks.back().map(|tick| tick.price)
    }

    fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.buffer.read().last_update
    }
}
