//! BTC bracket signals from cross-venue price fusion.
//!
//! Fair value blends the venues by fixed weights (renormalized over
//! whichever venues reported), momentum compares that fusion against the
//! same fusion anchored one lookback earlier, and the market side of the
//! edge is the order book's VWAP effective ask for the target size.

use crate::application::signals::{direction_for_edge, edge_bps};
use crate::domain::models::{
    combine_price_tiers, normalize_probability, Direction, Market, MarketSnapshot, PriceTier,
    SignalRecord, SignalType, SpotSource, SpotTick,
};
use crate::domain::orderbook::{effective_no_ask_vwap, effective_yes_ask_vwap, OrderBookLevels};
use crate::infrastructure::config::Settings;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;

/// A venue quote with provenance
#[derive(Debug, Clone, Copy)]
pub struct SpotQuote {
    pub price: f64,
    pub ts: DateTime<Utc>,
    pub tier: PriceTier,
}

pub type SpotQuotes = HashMap<SpotSource, SpotQuote>;

/// Momentum saturates the probability shift at ±0.35 over this many bps.
const MOMENTUM_FULL_SCALE_BPS: f64 = 800.0;
const MAX_FAIR_SHIFT: f64 = 0.35;

/// Weight-blended fair value over the venues present.
fn weighted_fair_value(prices: &HashMap<SpotSource, f64>) -> Option<f64> {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for (source, price) in prices {
        if *price <= 0.0 {
            continue;
        }
        let weight = source.fusion_weight();
        weighted += price * weight;
        total_weight += weight;
    }
    if total_weight <= 0.0 {
        return None;
    }
    Some(weighted / total_weight)
}

/// Cross-venue agreement in [0, 1]: tight venues score near 1, a lone
/// venue scores 0.7.
fn agreement_factor(prices: &HashMap<SpotSource, f64>, fair: f64) -> f64 {
    let values: Vec<f64> = prices.values().copied().filter(|p| *p > 0.0).collect();
    match values.len() {
        0 => 0.0,
        1 => 0.7,
        _ => {
            let max = values.iter().cloned().fold(f64::MIN, f64::max);
            let min = values.iter().cloned().fold(f64::MAX, f64::min);
            if fair <= 0.0 {
                return 0.0;
            }
            let spread_bps = (max - min) / fair * 10000.0;
            (1.0 - (spread_bps / 100.0).min(1.0)).clamp(0.0, 1.0)
        }
    }
}

/// Venue prices at the most recent stored timestamp at or before `target`.
fn anchor_prices(
    recent_ticks: &[SpotTick],
    target: DateTime<Utc>,
) -> Option<(DateTime<Utc>, HashMap<SpotSource, f64>)> {
    let mut timestamps: Vec<DateTime<Utc>> = recent_ticks
        .iter()
        .filter(|tick| tick.ts <= target && tick.price_usd > 0.0)
        .map(|tick| tick.ts)
        .collect();
    timestamps.sort();
    timestamps.dedup();
    let anchor_ts = *timestamps.last()?;
    let mut prices = HashMap::new();
    for tick in recent_ticks {
        if tick.ts == anchor_ts && tick.price_usd > 0.0 {
            prices.insert(tick.source, tick.price_usd);
        }
    }
    if prices.is_empty() {
        return None;
    }
    Some((anchor_ts, prices))
}

/// Build signals for every BTC bracket with a readable market price.
#[allow(clippy::too_many_arguments)]
pub fn build_btc_signals(
    settings: &Settings,
    markets: &[Market],
    snapshots_by_ticker: &HashMap<String, MarketSnapshot>,
    recent_ticks: &[SpotTick],
    live_quotes: &SpotQuotes,
    orderbooks_by_ticker: &HashMap<String, OrderBookLevels>,
    book_tiers: &HashMap<String, PriceTier>,
    now_utc: DateTime<Utc>,
) -> Vec<SignalRecord> {
    let latest_prices: HashMap<SpotSource, f64> = live_quotes
        .iter()
        .filter(|(_, quote)| quote.price > 0.0)
        .map(|(source, quote)| (*source, quote.price))
        .collect();
    let fair_now = match weighted_fair_value(&latest_prices) {
        Some(fair_now) => fair_now,
        None => return Vec::new(),
    };
    let latest_agreement = agreement_factor(&latest_prices, fair_now);

    let lookback_target =
        now_utc - Duration::minutes(settings.btc.momentum_lookback_minutes.max(1));
    let (anchor_ts, anchor_map) = match anchor_prices(recent_ticks, lookback_target) {
        Some((ts, map)) => (Some(ts), map),
        None => (None, latest_prices.clone()),
    };
    let fair_anchor = weighted_fair_value(&anchor_map).unwrap_or(fair_now);
    let anchor_agreement = agreement_factor(&anchor_map, fair_anchor);

    let momentum_bps = if fair_anchor > 0.0 {
        (fair_now / fair_anchor - 1.0) * 10000.0
    } else {
        0.0
    };
    let fair_shift =
        (momentum_bps / MOMENTUM_FULL_SCALE_BPS).clamp(-MAX_FAIR_SHIFT, MAX_FAIR_SHIFT);
    let fair_yes_prob = (0.5 + fair_shift).clamp(0.01, 0.99);

    let confidence = (latest_agreement + anchor_agreement) / 2.0;
    let quote_tiers: Vec<PriceTier> = live_quotes.values().map(|quote| quote.tier).collect();
    let sources_observed: Vec<&str> = {
        let mut names: Vec<&str> = latest_prices.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    };
    let target_qty = settings.paper_trading.contract_count.max(1);

    let mut signals = Vec::new();
    for market in markets {
        if !market.in_series("KXBTC15M") {
            continue;
        }

        // Effective market price: VWAP of the book for the target size
        // when a book is available, else the snapshot quote.
        let book = orderbooks_by_ticker.get(&market.ticker);
        let mut market_prob: Option<f64> = None;
        let mut vwap_cents: Option<f64> = None;
        let mut fillable_qty: Option<i64> = None;
        let mut liquidity_sufficient: Option<bool> = None;
        let mut book_tier: Option<PriceTier> = None;

        if let Some(book) = book {
            let yes_side = effective_yes_ask_vwap(book, target_qty);
            let no_side = effective_no_ask_vwap(book, target_qty);
            // Score both sides against fair value and keep the larger
            // absolute edge.
            let yes_candidate = yes_side.map(|(vwap, filled)| {
                let prob = vwap / 100.0;
                (fair_yes_prob - prob, prob, vwap, filled)
            });
            let no_candidate = no_side.map(|(vwap, filled)| {
                let implied_yes = 1.0 - vwap / 100.0;
                (fair_yes_prob - implied_yes, implied_yes, vwap, filled)
            });
            let chosen = match (yes_candidate, no_candidate) {
                (Some(yes), Some(no)) => {
                    if yes.0.abs() >= no.0.abs() {
                        Some(yes)
                    } else {
                        Some(no)
                    }
                }
                (Some(yes), None) => Some(yes),
                (None, Some(no)) => Some(no),
                (None, None) => None,
            };
            if let Some((_edge, prob, vwap, filled)) = chosen {
                market_prob = Some(prob);
                vwap_cents = Some((vwap * 100.0).round() / 100.0);
                fillable_qty = Some(filled);
                liquidity_sufficient = Some(filled >= target_qty);
                book_tier = Some(
                    book_tiers
                        .get(&market.ticker)
                        .copied()
                        .unwrap_or(PriceTier::Rest),
                );
            }
        }
        if market_prob.is_none() {
            market_prob = snapshots_by_ticker
                .get(&market.ticker)
                .and_then(|snapshot| normalize_probability(snapshot.yes_price));
            if market_prob.is_some() {
                book_tier = Some(PriceTier::Rest);
            }
        }
        let market_prob = match market_prob {
            Some(market_prob) => market_prob,
            None => continue,
        };

        let edge = edge_bps(fair_yes_prob, market_prob);
        let direction = direction_for_edge(edge, settings.signals.min_edge_bps);
        if direction == Direction::Flat && !settings.signals.store_all {
            continue;
        }

        let mut tiers = quote_tiers.clone();
        if let Some(tier) = book_tier {
            tiers.push(tier);
        }
        let data_source = combine_price_tiers(&tiers);

        signals.push(SignalRecord {
            signal_type: SignalType::Btc,
            market_ticker: market.ticker.clone(),
            direction,
            model_probability: (fair_yes_prob * 1e6).round() / 1e6,
            market_probability: (market_prob * 1e6).round() / 1e6,
            edge_bps: edge,
            confidence: (confidence * 1e4).round() / 1e4,
            data_source,
            vwap_cents,
            fillable_qty,
            liquidity_sufficient,
            details: json!({
                "latest_spot": (fair_now * 1e4).round() / 1e4,
                "anchor_spot": (fair_anchor * 1e4).round() / 1e4,
                "anchor_tick_ts": anchor_ts.map(|ts| ts.to_rfc3339()),
                "momentum_bps": (momentum_bps * 100.0).round() / 100.0,
                "latest_agreement": (latest_agreement * 1e4).round() / 1e4,
                "anchor_agreement": (anchor_agreement * 1e4).round() / 1e4,
                "sources_observed": sources_observed,
                "lookback_minutes": settings.btc.momentum_lookback_minutes,
                "target_qty": target_qty,
            }),
            created_at: now_utc,
        });
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(price: f64, tier: PriceTier) -> SpotQuote {
        SpotQuote {
            price,
            ts: Utc::now(),
            tier,
        }
    }

    fn btc_market(ticker: &str) -> Market {
        Market {
            ticker: ticker.to_string(),
            title: String::new(),
            status: "open".to_string(),
            close_time: None,
            raw: json!({"series_ticker": "KXBTC15M"}),
        }
    }

    fn tick(source: SpotSource, price: f64, minutes_ago: i64) -> SpotTick {
        SpotTick {
            ts: Utc::now() - Duration::minutes(minutes_ago),
            source,
            symbol: "BTCUSD".to_string(),
            price_usd: price,
            raw: json!({}),
        }
    }

    #[test]
    fn fusion_renormalizes_over_present_venues() {
        let prices = HashMap::from([
            (SpotSource::Binance, 100.0),
            (SpotSource::Coinbase, 110.0),
        ]);
        // (100*0.25 + 110*0.30) / 0.55
        let fair = weighted_fair_value(&prices).unwrap();
        assert!((fair - (25.0 + 33.0) / 0.55).abs() < 1e-9);
        assert!(weighted_fair_value(&HashMap::new()).is_none());
    }

    #[test]
    fn agreement_tiers() {
        let one = HashMap::from([(SpotSource::Kraken, 100.0)]);
        assert_eq!(agreement_factor(&one, 100.0), 0.7);

        let tight = HashMap::from([
            (SpotSource::Binance, 100.0),
            (SpotSource::Coinbase, 100.1),
        ]);
        let fair = weighted_fair_value(&tight).unwrap();
        // ~10 bps spread -> agreement ~0.9
        let agreement = agreement_factor(&tight, fair);
        assert!(agreement > 0.85 && agreement < 0.95);

        let wide = HashMap::from([
            (SpotSource::Binance, 100.0),
            (SpotSource::Coinbase, 102.0),
        ]);
        let fair = weighted_fair_value(&wide).unwrap();
        assert_eq!(agreement_factor(&wide, fair), 0.0);
    }

    #[test]
    fn anchor_uses_most_recent_tick_at_or_before_target() {
        let ticks = vec![
            tick(SpotSource::Binance, 100.0, 30),
            tick(SpotSource::Binance, 101.0, 12),
            tick(SpotSource::Coinbase, 101.5, 12),
            tick(SpotSource::Binance, 105.0, 1),
        ];
        let target = Utc::now() - Duration::minutes(10);
        let (anchor_ts, prices) = anchor_prices(&ticks, target).unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[&SpotSource::Binance], 101.0);
        assert!(anchor_ts <= target);
        assert!(anchor_prices(&[], target).is_none());
    }

    #[test]
    fn momentum_shifts_fair_probability() {
        let mut settings = Settings::default();
        settings.signals.min_edge_bps = 100;
        settings.btc.momentum_lookback_minutes = 10;
        let markets = vec![btc_market("KXBTC15M-1")];
        // +40 bps momentum -> shift 0.05 -> fair 0.55.
        let live = SpotQuotes::from([
            (SpotSource::Binance, quote(100400.0, PriceTier::Ws)),
            (SpotSource::Coinbase, quote(100400.0, PriceTier::Ws)),
        ]);
        let recent = vec![
            tick(SpotSource::Binance, 100000.0, 12),
            tick(SpotSource::Coinbase, 100000.0, 12),
        ];
        let snapshots = HashMap::from([(
            "KXBTC15M-1".to_string(),
            MarketSnapshot {
                ticker: "KXBTC15M-1".to_string(),
                ts: Utc::now(),
                yes_price: Some(0.50),
                no_price: Some(0.50),
                volume: None,
                raw: json!({}),
            },
        )]);
        let signals = build_btc_signals(
            &settings,
            &markets,
            &snapshots,
            &recent,
            &live,
            &HashMap::new(),
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert!((signal.model_probability - 0.55).abs() < 1e-6);
        assert_eq!(signal.direction, Direction::BuyYes);
        assert!((signal.edge_bps - 500.0).abs() < 1.0);
        // Snapshot-only market data mixes with WS quotes.
        assert_eq!(
            signal.data_source,
            crate::domain::models::SignalDataSource::Mixed
        );
    }

    #[test]
    fn vwap_book_side_with_larger_edge_wins() {
        let mut settings = Settings::default();
        settings.signals.min_edge_bps = 100;
        settings.paper_trading.contract_count = 4;
        let markets = vec![btc_market("KXBTC15M-1")];
        let live = SpotQuotes::from([
            (SpotSource::Binance, quote(100000.0, PriceTier::Ws)),
            (SpotSource::Coinbase, quote(100000.0, PriceTier::Ws)),
        ]);
        // Flat momentum: anchor equals latest, fair stays 0.50.
        let recent = vec![
            tick(SpotSource::Binance, 100000.0, 12),
            tick(SpotSource::Coinbase, 100000.0, 12),
        ];
        // NO bids at 70 make YES buyable at 30 (edge +0.20); YES bids at
        // 40 make NO buyable at 60, implied yes 0.40 (edge +0.10).
        let book = OrderBookLevels {
            yes: vec![(40, 10)],
            no: vec![(70, 10)],
        };
        let books = HashMap::from([("KXBTC15M-1".to_string(), book)]);
        let tiers = HashMap::from([("KXBTC15M-1".to_string(), PriceTier::Ws)]);
        let signals = build_btc_signals(
            &settings,
            &markets,
            &HashMap::new(),
            &recent,
            &live,
            &books,
            &tiers,
            Utc::now(),
        );
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert!((signal.market_probability - 0.30).abs() < 1e-6);
        assert_eq!(signal.vwap_cents, Some(30.0));
        assert_eq!(signal.fillable_qty, Some(4));
        assert_eq!(signal.liquidity_sufficient, Some(true));
        assert_eq!(signal.direction, Direction::BuyYes);
        assert_eq!(
            signal.data_source,
            crate::domain::models::SignalDataSource::Ws
        );
    }

    #[test]
    fn no_quotes_means_no_signals() {
        let settings = Settings::default();
        let markets = vec![btc_market("KXBTC15M-1")];
        let signals = build_btc_signals(
            &settings,
            &markets,
            &HashMap::new(),
            &[],
            &SpotQuotes::new(),
            &HashMap::new(),
            &HashMap::new(),
            Utc::now(),
        );
        assert!(signals.is_empty());
    }
}
