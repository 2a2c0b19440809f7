//! Stub-mode data generator.
//!
//! Lets the whole pipeline run without exchange access. Prices are seeded
//! by `(ticker, minute)` so repeated calls within a minute are stable and
//! snapshot inserts stay idempotent.

use crate::domain::models::{Market, MarketSnapshot};
use crate::domain::orderbook::OrderBookLevels;
use chrono::{DateTime, Duration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub struct MockDataGenerator;

fn seeded_rng(ticker: &str, at_time: DateTime<Utc>) -> StdRng {
    let mut hasher = DefaultHasher::new();
    ticker.hash(&mut hasher);
    at_time
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at_time)
        .timestamp()
        .hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}

impl MockDataGenerator {
    /// A plausible target set: one weather bracket event plus one BTC
    /// 15-minute market.
    pub fn generate_markets(limit: usize) -> Vec<Market> {
        let now = Utc::now();
        let event_ticker = format!("KXHIGHNY-{}", now.format("%y%b%d").to_string().to_uppercase());
        let close_time = now + Duration::hours(12);
        let brackets = [
            (Some(0.0), Some(83.0), "82 or below"),
            (Some(83.0), Some(85.0), "83 to 84"),
            (Some(85.0), Some(87.0), "85 to 86"),
            (Some(87.0), None, "87 or higher"),
        ];
        let mut markets = Vec::new();
        for (idx, (floor, cap, label)) in brackets.iter().enumerate() {
            markets.push(Market {
                ticker: format!("{event_ticker}-B{}", 83 + (idx as i64) * 2),
                title: format!("Highest temperature in NYC today: {label}"),
                status: "open".to_string(),
                close_time: Some(close_time),
                raw: json!({
                    "source": "stub",
                    "series_ticker": "KXHIGHNY",
                    "event_ticker": event_ticker,
                    "floor_strike": floor,
                    "cap_strike": cap,
                    "subtitle": label,
                }),
            });
        }
        markets.push(Market {
            ticker: format!(
                "KXBTC15M-{}-T118000",
                now.format("%y%b%d%H").to_string().to_uppercase()
            ),
            title: "BTC above 118,000 at the quarter hour?".to_string(),
            status: "open".to_string(),
            close_time: Some(now + Duration::minutes(15)),
            raw: json!({
                "source": "stub",
                "series_ticker": "KXBTC15M",
                "event_ticker": "KXBTC15M",
            }),
        });
        markets.truncate(limit.max(1));
        markets
    }

    pub fn generate_current_snapshot(market: &Market, at_time: DateTime<Utc>) -> MarketSnapshot {
        // Minute-stamped so repeated reads inside a minute are identical
        // and snapshot inserts stay idempotent.
        let at_time = at_time
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(at_time);
        let mut rng = seeded_rng(&market.ticker, at_time);
        let yes_price: f64 = (rng.gen_range(0.10_f64..0.90) * 1000.0).round() / 1000.0;
        let no_price = ((1.0 - yes_price) * 1000.0).round() / 1000.0;
        let volume = (rng.gen_range(500.0..15000.0_f64) * 100.0).round() / 100.0;
        let yes_cents = (yes_price * 100.0).round() as i64;
        MarketSnapshot {
            ticker: market.ticker.clone(),
            ts: at_time,
            yes_price: Some(yes_price),
            no_price: Some(no_price),
            volume: Some(volume),
            raw: json!({
                "source": "stub",
                "yes_bid": (yes_cents - 1).max(1),
                "yes_ask": (yes_cents + 1).min(99),
                "no_bid": (100 - yes_cents - 1).max(1),
                "no_ask": (100 - yes_cents + 1).min(99),
            }),
        }
    }

    pub fn generate_historical_snapshots(
        market: &Market,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<MarketSnapshot> {
        let mut snapshots = Vec::new();
        let mut current = start;
        while current <= end {
            snapshots.push(Self::generate_current_snapshot(market, current));
            current += Duration::minutes(60);
        }
        snapshots
    }

    /// Two-level book on each side around the seeded snapshot price.
    pub fn generate_orderbook(ticker: &str, at_time: DateTime<Utc>) -> OrderBookLevels {
        let mut rng = seeded_rng(ticker, at_time);
        let yes_bid = rng.gen_range(20..75_i64);
        let no_bid = (100 - yes_bid - 2).max(1);
        OrderBookLevels {
            yes: vec![
                (yes_bid, rng.gen_range(10..120)),
                ((yes_bid - 2).max(1), rng.gen_range(10..120)),
            ],
            no: vec![
                (no_bid, rng.gen_range(10..120)),
                ((no_bid - 2).max(1), rng.gen_range(10..120)),
            ],
        }
    }
}
