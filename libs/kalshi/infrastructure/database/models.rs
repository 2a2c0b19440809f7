//! Row types returned by store read paths.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;

/// Open exposure grouped by `(ticker, side)` over submitted and
/// partially-filled orders
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OpenPosition {
    pub market_ticker: String,
    pub side: String,
    pub contracts: i64,
    pub avg_price_cents: f64,
}

/// A persisted signal, as read back for digests and commands
#[derive(Debug, Clone, FromRow)]
pub struct SignalRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub signal_type: String,
    pub market_ticker: String,
    pub direction: String,
    pub model_probability: f64,
    pub market_probability: f64,
    pub edge_bps: f64,
    pub confidence: f64,
}

/// A persisted paper order
#[derive(Debug, Clone, FromRow)]
pub struct PaperOrderRow {
    pub id: i64,
    pub market_ticker: String,
    pub signal_type: String,
    pub direction: String,
    pub side: String,
    pub count: i64,
    pub limit_price_cents: i64,
    pub provider: String,
    pub status: String,
    pub reason: Option<String>,
    pub external_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Latest stored tick for one venue
#[derive(Debug, Clone, FromRow)]
pub struct SpotTickRow {
    pub ts: DateTime<Utc>,
    pub source: String,
    pub symbol: String,
    pub price_usd: f64,
}

impl SpotTickRow {
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.ts).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Aggregate prediction quality over a window
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccuracyMetrics {
    pub n_signals: i64,
    pub brier_score: Option<f64>,
    pub market_brier_score: Option<f64>,
    pub log_loss: Option<f64>,
    /// Correlation between predicted edge and realized per-contract pnl
    pub edge_reliability: Option<f64>,
    pub hit_rate: Option<f64>,
    pub avg_pnl_per_contract: Option<f64>,
    pub total_pnl: Option<f64>,
}

/// Latest per-(date, ticker) weather probability joined to its resolution
#[derive(Debug, Clone, FromRow)]
pub struct WeatherBacktestRow {
    pub target_date: NaiveDate,
    pub ticker: String,
    pub model_prob: f64,
    pub market_prob: Option<f64>,
    pub result: String,
}

impl WeatherBacktestRow {
    pub fn outcome(&self) -> i64 {
        if self.result == "yes" {
            1
        } else {
            0
        }
    }

    pub fn edge(&self) -> Option<f64> {
        self.market_prob.map(|market| self.model_prob - market)
    }
}

/// Sandbox order fill quality over a window
#[derive(Debug, Clone, Default, Serialize)]
pub struct FillMetrics {
    pub total_orders: i64,
    pub filled_orders: i64,
    pub open_orders: i64,
    pub canceled_orders: i64,
    pub failed_orders: i64,
    pub fill_rate: Option<f64>,
    pub avg_fill_minutes: Option<f64>,
}

/// A detected arbitrage opportunity with its execution outcome, as
/// persisted
#[derive(Debug, Clone)]
pub struct BracketArbRecord {
    pub detected_at: DateTime<Utc>,
    pub event_ticker: String,
    pub arb_type: String,
    pub n_brackets: i64,
    pub cost_cents: i64,
    pub payout_cents: i64,
    pub profit_cents: i64,
    pub profit_after_fees_cents: i64,
    pub max_sets: i64,
    pub total_profit_cents: i64,
    pub legs: Value,
    pub executed: bool,
    pub execution_result: Value,
}
