//! Kraken v2 ticker feed.
//!
//! The v2 ticker omits event timestamps, so ticks are stamped at receipt;
//! cross-feed age comparisons are approximate for this venue.

use super::SpotFeedView;
use chrono::{DateTime, Utc};
use hypersockets::{ManagerConfig, MessageHandler, WsManager};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;

const KRAKEN_WS_URL: &str = "wss://ws.kraken.com/v2";
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

struct KrakenHandler {
    buffer: Arc<RwLock<TickBuffer>>,
}

#[async_trait::async_trait]
impl MessageHandler for KrakenHandler {
    async fn on_message(&self, message: Value) {
        if message.get("channel").and_then(Value::as_str) != Some("ticker") {
            return;
        }
        let row = match message
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
        {
            Some(row) if row.is_object() => row,
            _ => return,
        };
        let price = match row.get("last").and_then(parse_number) {
            Some(price) if price > 0.0 => price,
            _ => return,
        };
        let best_bid = row.get("bid").and_then(parse_number);
        let best_ask = row.get("ask").and_then(parse_number);
        let ts = Utc::now();

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

/// BTC/USD v2 ticker feed
pub struct KrakenFeed {
    manager: Arc<WsManager>,
    buffer: Arc<RwLock<TickBuffer>>,
}

impl KrakenFeed {
    pub fn new() -> Self {
        Self::with_url(KRAKEN_WS_URL)
    }

    pub fn with_url(url: &str) -> Self {
        let buffer = Arc::new(RwLock::new(TickBuffer::default()));
        let handler = Arc::new(KrakenHandler {
            buffer: Arc::clone(&buffer),
        });
        let manager = Arc::new(
            WsManager::new(ManagerConfig::new(url), handler)
                .expect("feed URL must be a valid ws(s) URL"),
        );
        manager.subscribe(json!({
            "method": "subscribe",
            "params": {"channel": "ticker", "symbol": ["BTC/USD"]},
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

impl Default for KrakenFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl SpotFeedView for KrakenFeed {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn deliver(feed: &KrakenFeed, message: Value) {
        let handler = KrakenHandler {
            buffer: Arc::clone(&feed.buffer),
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(handler.on_message(message));
    }

    #[test]
    fn ticker_rows_store_receipt_stamped_quotes() {
        let feed = KrakenFeed::new();
        deliver(
            &feed,
            json!({
                "channel": "ticker",
                "data": [{"last": 118300.5, "bid": 118300.0, "ask": 118301.0}],
            }),
        );
        let quote = feed.latest_quote().unwrap();
        assert_eq!(quote.price, 118300.5);
        assert_eq!(quote.best_bid, Some(118300.0));
        assert!(feed.age_seconds() < 5.0);
    }

    #[test]
    fn non_ticker_channels_are_ignored() {
        let feed = KrakenFeed::new();
        deliver(&feed, json!({"channel": "status", "data": [{}]}));
        deliver(&feed, json!({"channel": "ticker", "data": []}));
        assert!(feed.latest_price().is_none());
    }
}
