//! Core entities shared across the pipeline.
//!
//! JSON payloads are normalized into these types once, at the boundary that
//! received them; everything downstream operates on typed records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Enums
// =============================================================================

/// Trade direction attached to a signal or order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    BuyYes,
    BuyNo,
    Flat,
    /// Both legs of a detected arbitrage set
    Arbitrage,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::BuyYes => "buy_yes",
            Direction::BuyNo => "buy_no",
            Direction::Flat => "flat",
            Direction::Arbitrage => "arbitrage",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "buy_yes" => Some(Direction::BuyYes),
            "buy_no" => Some(Direction::BuyNo),
            "flat" => Some(Direction::Flat),
            "arbitrage" => Some(Direction::Arbitrage),
            _ => None,
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, Direction::BuyYes | Direction::BuyNo)
    }

    /// The book side this direction buys.
    pub fn side(&self) -> Option<OrderSide> {
        match self {
            Direction::BuyYes => Some(OrderSide::Yes),
            Direction::BuyNo => Some(OrderSide::No),
            _ => None,
        }
    }
}

/// Side of a binary market order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Yes,
    No,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Yes => "yes",
            OrderSide::No => "no",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "yes" => Some(OrderSide::Yes),
            "no" => Some(OrderSide::No),
            _ => None,
        }
    }

    /// Direction expected to hold this side as a position.
    pub fn expected_direction(&self) -> Direction {
        match self {
            OrderSide::Yes => Direction::BuyYes,
            OrderSide::No => Direction::BuyNo,
        }
    }
}

/// Paper-order lifecycle.
///
/// `Simulated` is terminal. `Submitted` may move to `PartiallyFilled`,
/// `Filled`, `Canceled`, or `Failed`; the last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Simulated,
    Submitted,
    PartiallyFilled,
    Filled,
    Canceled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Simulated => "simulated",
            OrderStatus::Submitted => "submitted",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "simulated" => Some(OrderStatus::Simulated),
            "submitted" => Some(OrderStatus::Submitted),
            "partially_filled" => Some(OrderStatus::PartiallyFilled),
            "filled" => Some(OrderStatus::Filled),
            "canceled" => Some(OrderStatus::Canceled),
            "failed" => Some(OrderStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Simulated
                | OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Failed
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Submitted | OrderStatus::PartiallyFilled)
    }
}

/// Signal families produced by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Weather,
    Btc,
    /// Pseudo-type recorded on bracket-arbitrage legs
    Arb,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Weather => "weather",
            SignalType::Btc => "btc",
            SignalType::Arb => "arb",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "weather" => Some(SignalType::Weather),
            "btc" => Some(SignalType::Btc),
            "arb" => Some(SignalType::Arb),
            _ => None,
        }
    }
}

/// Crypto spot price venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotSource {
    Binance,
    Coinbase,
    Kraken,
    Bitstamp,
}

impl SpotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpotSource::Binance => "binance",
            SpotSource::Coinbase => "coinbase",
            SpotSource::Kraken => "kraken",
            SpotSource::Bitstamp => "bitstamp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "binance" => Some(SpotSource::Binance),
            "coinbase" => Some(SpotSource::Coinbase),
            "kraken" => Some(SpotSource::Kraken),
            "bitstamp" => Some(SpotSource::Bitstamp),
            _ => None,
        }
    }

    /// Fusion weight used when blending venue prices into a fair value.
    pub fn fusion_weight(&self) -> f64 {
        match self {
            SpotSource::Binance => 0.25,
            SpotSource::Coinbase => 0.30,
            SpotSource::Kraken => 0.20,
            SpotSource::Bitstamp => 0.15,
        }
    }

    pub fn all() -> [SpotSource; 4] {
        [
            SpotSource::Binance,
            SpotSource::Coinbase,
            SpotSource::Kraken,
            SpotSource::Bitstamp,
        ]
    }
}

/// Freshness tier of a single price input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceTier {
    Ws,
    RestFallback,
    Rest,
}

impl PriceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceTier::Ws => "ws",
            PriceTier::RestFallback => "rest_fallback",
            PriceTier::Rest => "rest",
        }
    }
}

/// Fold per-input tiers into the signal-level provenance tag.
pub fn combine_price_tiers(tiers: &[PriceTier]) -> SignalDataSource {
    if tiers.is_empty() {
        return SignalDataSource::Rest;
    }
    if tiers.iter().any(|tier| *tier == PriceTier::RestFallback) {
        return SignalDataSource::RestFallback;
    }
    if tiers.iter().all(|tier| *tier == PriceTier::Ws) {
        return SignalDataSource::Ws;
    }
    if tiers.iter().all(|tier| *tier == PriceTier::Rest) {
        return SignalDataSource::Rest;
    }
    SignalDataSource::Mixed
}

/// Aggregate provenance of every input behind a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalDataSource {
    /// All inputs came from live WebSocket feeds
    Ws,
    /// A blend of live and fallback inputs
    Mixed,
    /// At least one input came from a stale-tick fallback
    RestFallback,
    /// Everything came from REST polls
    Rest,
}

impl SignalDataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDataSource::Ws => "ws",
            SignalDataSource::Mixed => "mixed",
            SignalDataSource::RestFallback => "rest_fallback",
            SignalDataSource::Rest => "rest",
        }
    }
}

// =============================================================================
// Market data entities
// =============================================================================

/// A discovered market, mutated by status upserts until settled
#[derive(Debug, Clone)]
pub struct Market {
    pub ticker: String,
    pub title: String,
    pub status: String,
    pub close_time: Option<DateTime<Utc>>,
    pub raw: Value,
}

impl Market {
    pub fn series_ticker(&self) -> String {
        let from_raw = self
            .raw
            .get("series_ticker")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_uppercase();
        if !from_raw.is_empty() {
            return from_raw;
        }
        let ticker = self.ticker.trim().to_uppercase();
        match ticker.split_once('-') {
            Some((series, _)) => series.to_string(),
            None => ticker,
        }
    }

    /// Event grouping key: the event ticker when present, else the ticker
    /// prefix before the first dash.
    pub fn event_key(&self) -> String {
        let event = self
            .raw
            .get("event_ticker")
            .or_else(|| self.raw.get("event"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_uppercase();
        if !event.is_empty() {
            return event;
        }
        let ticker = self.ticker.trim().to_uppercase();
        match ticker.split_once('-') {
            Some((prefix, _)) => prefix.to_string(),
            None => ticker,
        }
    }

    pub fn in_series(&self, series: &str) -> bool {
        let series = series.trim().to_uppercase();
        if series.is_empty() {
            return false;
        }
        self.ticker.to_uppercase().starts_with(&series) || self.series_ticker() == series
    }
}

/// Point-in-time market prices. Idempotent on `(ticker, ts)`.
///
/// Quote units vary by source (probability in [0, 1] or whole cents);
/// consumers normalize through [`normalize_probability`].
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub ticker: String,
    pub ts: DateTime<Utc>,
    pub yes_price: Option<f64>,
    pub no_price: Option<f64>,
    pub volume: Option<f64>,
    pub raw: Value,
}

/// Spot price observation. Idempotent on `(ts, source, symbol)`.
#[derive(Debug, Clone)]
pub struct SpotTick {
    pub ts: DateTime<Utc>,
    pub source: SpotSource,
    pub symbol: String,
    pub price_usd: f64,
    pub raw: Value,
}

/// One ensemble member's daily-max forecast.
/// Idempotent on `(collected_at, target_date, model, member)`.
#[derive(Debug, Clone)]
pub struct WeatherEnsembleSample {
    pub collected_at: DateTime<Utc>,
    pub target_date: NaiveDate,
    pub model: String,
    pub member: String,
    pub max_temp_f: f64,
    pub source: String,
}

/// Per-bracket model probability persisted each tick for calibration
#[derive(Debug, Clone)]
pub struct WeatherBracketProb {
    pub collected_at: DateTime<Utc>,
    pub target_date: NaiveDate,
    pub ticker: String,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub model_prob: f64,
    pub market_prob: Option<f64>,
    pub sample_count: i64,
}

// =============================================================================
// Signals and orders
// =============================================================================

/// A scored trading signal keyed by market
#[derive(Debug, Clone)]
pub struct SignalRecord {
    pub signal_type: SignalType,
    pub market_ticker: String,
    pub direction: Direction,
    /// Model fair probability in [0, 1]
    pub model_probability: f64,
    /// Effective market probability in [0, 1] for the chosen direction
    pub market_probability: f64,
    /// `round((model - market) * 10000, 2)`
    pub edge_bps: f64,
    pub confidence: f64,
    pub data_source: SignalDataSource,
    /// VWAP effective price, in cents, behind `market_probability`
    pub vwap_cents: Option<f64>,
    /// Contracts fillable at the VWAP price
    pub fillable_qty: Option<i64>,
    pub liquidity_sufficient: Option<bool>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

impl SignalRecord {
    pub fn is_actionable(&self) -> bool {
        self.direction.is_actionable()
    }
}

/// A simulated or sandbox-submitted limit order
#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub market_ticker: String,
    pub signal_type: SignalType,
    pub direction: Direction,
    pub side: OrderSide,
    pub count: i64,
    pub limit_price_cents: i64,
    /// `simulate` or `kalshi_demo`
    pub provider: String,
    pub status: OrderStatus,
    pub reason: Option<String>,
    pub external_order_id: Option<String>,
    pub request_payload: Value,
    pub response_payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Append-only lifecycle entry for a persisted order
#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub order_id: i64,
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub status: OrderStatus,
    pub queue_position: Option<i64>,
    pub details: Value,
}

/// Settled-market outcome. Upsert-by-ticker.
#[derive(Debug, Clone)]
pub struct MarketResolution {
    pub ticker: String,
    pub series_ticker: Option<String>,
    pub event_ticker: Option<String>,
    pub market_type: String,
    pub resolved_at: Option<DateTime<Utc>>,
    /// `yes`, `no`, or `unknown`
    pub result: Option<String>,
    pub actual_value: Option<f64>,
    pub resolution_source: String,
    pub collected_at: DateTime<Utc>,
}

/// Outcome of one notifier delivery (or command reply)
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub channel: String,
    pub event_type: String,
    pub market_ticker: Option<String>,
    pub message: String,
    /// `sent` or `failed`
    pub status: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Normalize a quoted price into a probability in [0, 1]; values above 1
/// are treated as cents.
pub fn normalize_probability(price: Option<f64>) -> Option<f64> {
    let price = price?;
    if price > 1.0 {
        Some((price / 100.0).clamp(0.0, 1.0))
    } else {
        Some(price.clamp(0.0, 1.0))
    }
}

/// Convert a price that may be expressed in dollars-probability or cents
/// into integer cents.
pub fn price_to_cents(price: Option<f64>) -> Option<i64> {
    let price = price?;
    if price > 1.0 {
        Some(price.round() as i64)
    } else {
        Some((price * 100.0).round() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direction_round_trip() {
        for direction in [
            Direction::BuyYes,
            Direction::BuyNo,
            Direction::Flat,
            Direction::Arbitrage,
        ] {
            assert_eq!(Direction::parse(direction.as_str()), Some(direction));
        }
        assert_eq!(Direction::parse("hold"), None);
        assert!(Direction::BuyYes.is_actionable());
        assert!(!Direction::Flat.is_actionable());
        assert_eq!(Direction::BuyNo.side(), Some(OrderSide::No));
        assert_eq!(Direction::Flat.side(), None);
    }

    #[test]
    fn order_status_terminality() {
        assert!(OrderStatus::Simulated.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
        assert!(OrderStatus::PartiallyFilled.is_open());
    }

    #[test]
    fn fusion_weights_match_schedule() {
        assert_eq!(SpotSource::Binance.fusion_weight(), 0.25);
        assert_eq!(SpotSource::Coinbase.fusion_weight(), 0.30);
        assert_eq!(SpotSource::Kraken.fusion_weight(), 0.20);
        assert_eq!(SpotSource::Bitstamp.fusion_weight(), 0.15);
    }

    #[test]
    fn market_series_and_event_keys() {
        let market = Market {
            ticker: "KXHIGHNY-26JUL08-B85".to_string(),
            title: "High temp 85-86".to_string(),
            status: "open".to_string(),
            close_time: None,
            raw: json!({"event_ticker": "kxhighny-26jul08"}),
        };
        assert_eq!(market.series_ticker(), "KXHIGHNY");
        assert_eq!(market.event_key(), "KXHIGHNY-26JUL08");
        assert!(market.in_series("KXHIGHNY"));
        assert!(!market.in_series("KXBTC15M"));

        let bare = Market {
            ticker: "KXBTC15M-26AUG0114-T118000".to_string(),
            title: String::new(),
            status: "open".to_string(),
            close_time: None,
            raw: json!({}),
        };
        assert_eq!(bare.event_key(), "KXBTC15M");
        assert_eq!(bare.series_ticker(), "KXBTC15M");
    }

    #[test]
    fn tier_combination_matches_provenance_rules() {
        use PriceTier::*;
        assert_eq!(combine_price_tiers(&[Ws, Ws]), SignalDataSource::Ws);
        assert_eq!(combine_price_tiers(&[Rest, Rest]), SignalDataSource::Rest);
        assert_eq!(
            combine_price_tiers(&[Ws, RestFallback]),
            SignalDataSource::RestFallback
        );
        assert_eq!(combine_price_tiers(&[Ws, Rest]), SignalDataSource::Mixed);
        assert_eq!(combine_price_tiers(&[]), SignalDataSource::Rest);
    }

    #[test]
    fn probability_normalization_handles_cents() {
        assert_eq!(normalize_probability(Some(0.62)), Some(0.62));
        assert_eq!(normalize_probability(Some(62.0)), Some(0.62));
        assert_eq!(normalize_probability(Some(150.0)), Some(1.0));
        assert_eq!(normalize_probability(None), None);
        assert_eq!(price_to_cents(Some(0.41)), Some(41));
        assert_eq!(price_to_cents(Some(41.0)), Some(41));
    }
}
