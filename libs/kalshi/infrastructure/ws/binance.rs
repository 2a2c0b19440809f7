//! Binance trade-stream feed.
//!
//! Subscribes to the raw `btcusdt@trade` stream and keeps a bounded ring
//! of trades for last-price, VWAP, and momentum windows.

use super::SpotFeedView;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hypersockets::{ManagerConfig, MessageHandler, WsManager};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws/btcusdt@trade";

/// Ring capacity; at Binance trade rates this covers several minutes.
const TICK_CAPACITY: usize = 5000;

#[derive(Debug, Clone, Copy)]
pub struct TradeTick {
    pub ts: DateTime<Utc>,
    pub price: f64,
    pub quantity: f64,
}

#[derive(Default)]
struct TickBuffer {
    ticks: VecDeque<TradeTick>,
    last_update: Option<DateTime<Utc>>,
}

struct BinanceHandler {
    buffer: Arc<RwLock<TickBuffer>>,
}

#[async_trait::async_trait]
impl MessageHandler for BinanceHandler {
    async fn on_message(&self, message: Value) {
        if message.get("e").and_then(Value::as_str) != Some("trade") {
            return;
        }
        // Binance quotes price/quantity as strings.
        let price = match message.get("p").and_then(parse_number) {
            Some(price) if price > 0.0 => price,
            _ => return,
        };
        let quantity = message.get("q").and_then(parse_number).unwrap_or(0.0);
        let ts = message
            .get("T")
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        let mut buffer = self.buffer.write();
        if buffer.ticks.len() >= TICK_CAPACITY {
            buffer.ticks.pop_front();
        }
        buffer.ticks.push_back(TradeTick {
            ts,
            price,
            quantity,
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

/// BTC/USDT trade feed
pub struct BinanceFeed {
    manager: Arc<WsManager>,
    buffer: Arc<RwLock<TickBuffer>>,
}

impl BinanceFeed {
    pub fn new() -> Self {
        Self::with_url(BINANCE_WS_URL)
    }

    pub fn with_url(url: &str) -> Self {
        let buffer = Arc::new(RwLock::new(TickBuffer::default()));
        let handler = Arc::new(BinanceHandler {
            buffer: Arc::clone(&buffer),
        });
        let manager = Arc::new(
            WsManager::new(ManagerConfig::new(url), handler)
                .expect("feed URL must be a valid ws(s) URL"),
        );
        Self { manager, buffer }
    }

    pub async fn run(&self) {
        self.manager.run().await;
    }

    pub fn close(&self) {
        self.manager.close();
    }

    /// Volume-weighted average trade price over the trailing window.
    pub fn vwap(&self, window_seconds: i64) -> Option<f64> {
        let cutoff = Utc::now() - Duration::seconds(window_seconds.max(1));
        let buffer = self.buffer.read();
        let mut weighted = 0.0;
        let mut volume = 0.0;
        for tick in buffer.ticks.iter().rev() {
            if tick.ts < cutoff {
                break;
            }
            weighted += tick.price * tick.quantity;
            volume += tick.quantity;
        }
        if volume <= 0.0 {
            return None;
        }
        Some(weighted / volume)
    }

    pub fn tick_count(&self) -> usize {
        self.buffer.read().ticks.len()
    }
}

impl Default for BinanceFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl SpotFeedView for BinanceFeed {
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

    fn price_history_window(&self, window_seconds: i64) -> Vec<f64> {
        let cutoff = Utc::now() - Duration::seconds(window_seconds.max(1));
        let buffer = self.buffer.read();
        let mut output: Vec<f64> = buffer
            .ticks
            .iter()
            .rev()
            .take_while(|tick| tick.ts >= cutoff)
            .map(|tick| tick.price)
            .collect();
        output.reverse();
        output
    }
}
