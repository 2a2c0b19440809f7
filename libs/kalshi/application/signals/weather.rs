//! Weather bracket signals from the forecast ensemble.

use crate::application::signals::{direction_for_edge, edge_bps};
use crate::domain::models::{
    normalize_probability, Direction, Market, MarketSnapshot, SignalDataSource, SignalRecord,
    SignalType, WeatherBracketProb, WeatherEnsembleSample,
};
use crate::infrastructure::client::as_f64;
use crate::infrastructure::config::Settings;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;

/// Members needed before sample strength saturates.
const FULL_SAMPLE_COUNT: f64 = 60.0;

/// Bracket bounds `(lower, upper)` as a half-open interval `[lower, upper)`.
///
/// Structured strike fields win; otherwise the bounds are recovered from
/// subtitle/title phrasing ("below X", "X or above", "X+", "X to Y"). An
/// integer range like "83 to 84" covers the whole upper degree, so the
/// parsed interval is `[83, 85)`.
pub fn parse_bracket_bounds(market: &Market) -> Option<(Option<f64>, Option<f64>)> {
    let floor = as_f64(market.raw.get("floor_strike").or_else(|| market.raw.get("floor")));
    let cap = as_f64(market.raw.get("cap_strike").or_else(|| market.raw.get("cap")));
    if floor.is_some() || cap.is_some() {
        return Some((floor, cap));
    }

    let candidates = [
        market
            .raw
            .get("subtitle")
            .and_then(|v| v.as_str())
            .unwrap_or(""),
        market
            .raw
            .get("yes_sub_title")
            .and_then(|v| v.as_str())
            .unwrap_or(""),
        market
            .raw
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or(""),
        market.title.as_str(),
    ];
    let below = Regex::new(r"below\s+(-?\d+(?:\.\d+)?)").ok()?;
    let above =
        Regex::new(r"(?:above|at least|or above|and above)\s+(-?\d+(?:\.\d+)?)").ok()?;
    let plus = Regex::new(r"(-?\d+(?:\.\d+)?)\s*(?:\+|or\s+higher)").ok()?;
    let range =
        Regex::new(r"(-?\d+(?:\.\d+)?)\s*(?:to|through|-|–)\s*(-?\d+(?:\.\d+)?)").ok()?;

    for text in candidates {
        let normalized = text.to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        if let Some(captures) = below.captures(&normalized) {
            let upper: f64 = captures.get(1)?.as_str().parse().ok()?;
            return Some((None, Some(upper)));
        }
        if let Some(captures) = above.captures(&normalized) {
            let lower: f64 = captures.get(1)?.as_str().parse().ok()?;
            return Some((Some(lower), None));
        }
        if let Some(captures) = plus.captures(&normalized) {
            let lower: f64 = captures.get(1)?.as_str().parse().ok()?;
            return Some((Some(lower), None));
        }
        if let Some(captures) = range.captures(&normalized) {
            let low: f64 = captures.get(1)?.as_str().parse().ok()?;
            let high: f64 = captures.get(2)?.as_str().parse().ok()?;
            if low.fract() == 0.0 && high.fract() == 0.0 {
                return Some((Some(low), Some(high + 1.0)));
            }
            return Some((Some(low), Some(high)));
        }
    }
    None
}

/// Share of ensemble members inside the half-open bounds.
fn probability_for_bounds(
    samples: &[WeatherEnsembleSample],
    lower: Option<f64>,
    upper: Option<f64>,
) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let hits = samples
        .iter()
        .filter(|sample| {
            if let Some(lower) = lower {
                if sample.max_temp_f < lower {
                    return false;
                }
            }
            if let Some(upper) = upper {
                if sample.max_temp_f >= upper {
                    return false;
                }
            }
            true
        })
        .count();
    Some(hits as f64 / samples.len() as f64)
}

fn weather_confidence(edge_bps_value: f64, sample_count: usize, min_edge_bps: i64) -> f64 {
    let sample_strength = (sample_count as f64 / FULL_SAMPLE_COUNT).min(1.0);
    let edge_strength =
        (edge_bps_value.abs() / ((min_edge_bps.max(1) as f64) * 3.0)).min(1.0);
    (sample_strength * edge_strength).clamp(0.0, 1.0)
}

/// Per-bracket model probabilities persisted each tick for calibration.
pub fn build_weather_probabilities(
    markets: &[Market],
    snapshots_by_ticker: &HashMap<String, MarketSnapshot>,
    samples: &[WeatherEnsembleSample],
    now_utc: DateTime<Utc>,
) -> Vec<WeatherBracketProb> {
    if samples.is_empty() {
        return Vec::new();
    }
    let target_date = samples[0].target_date;
    let mut rows = Vec::new();
    for market in markets {
        if !market.in_series("KXHIGHNY") {
            continue;
        }
        let bounds = match parse_bracket_bounds(market) {
            Some(bounds) => bounds,
            None => continue,
        };
        let model_prob = match probability_for_bounds(samples, bounds.0, bounds.1) {
            Some(model_prob) => model_prob,
            None => continue,
        };
        let market_prob = snapshots_by_ticker
            .get(&market.ticker)
            .and_then(|snapshot| normalize_probability(snapshot.yes_price));
        rows.push(WeatherBracketProb {
            collected_at: now_utc,
            target_date,
            ticker: market.ticker.clone(),
            lower_bound: bounds.0,
            upper_bound: bounds.1,
            model_prob,
            market_prob,
            sample_count: samples.len() as i64,
        });
    }
    rows
}

/// Ensemble-vs-market signals for every recognizable weather bracket.
pub fn build_weather_signals(
    settings: &Settings,
    markets: &[Market],
    snapshots_by_ticker: &HashMap<String, MarketSnapshot>,
    samples: &[WeatherEnsembleSample],
    now_utc: DateTime<Utc>,
) -> Vec<SignalRecord> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut signals = Vec::new();
    for market in markets {
        if !market.in_series("KXHIGHNY") {
            continue;
        }
        let bounds = match parse_bracket_bounds(market) {
            Some(bounds) => bounds,
            None => continue,
        };
        let model_prob = match probability_for_bounds(samples, bounds.0, bounds.1) {
            Some(model_prob) => model_prob,
            None => continue,
        };
        let market_prob = match snapshots_by_ticker
            .get(&market.ticker)
            .and_then(|snapshot| normalize_probability(snapshot.yes_price))
        {
            Some(market_prob) => market_prob,
            None => continue,
        };
        let edge = edge_bps(model_prob, market_prob);
        let direction = direction_for_edge(edge, settings.signals.min_edge_bps);
        if direction == Direction::Flat && !settings.signals.store_all {
            continue;
        }
        let confidence =
            weather_confidence(edge, samples.len(), settings.signals.min_edge_bps);
        signals.push(SignalRecord {
            signal_type: SignalType::Weather,
            market_ticker: market.ticker.clone(),
            direction,
            model_probability: (model_prob * 1e6).round() / 1e6,
            market_probability: (market_prob * 1e6).round() / 1e6,
            edge_bps: edge,
            confidence: (confidence * 1e4).round() / 1e4,
            data_source: SignalDataSource::Rest,
            vwap_cents: None,
            fillable_qty: None,
            liquidity_sufficient: None,
            details: json!({
                "lower_bound": bounds.0,
                "upper_bound": bounds.1,
                "sample_count": samples.len(),
                "target_date": samples[0].target_date.to_string(),
            }),
            created_at: now_utc,
        });
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn market(ticker: &str, raw: serde_json::Value, title: &str) -> Market {
        Market {
            ticker: ticker.to_string(),
            title: title.to_string(),
            status: "open".to_string(),
            close_time: None,
            raw,
        }
    }

    fn sample(max_temp_f: f64) -> WeatherEnsembleSample {
        WeatherEnsembleSample {
            collected_at: Utc::now(),
            target_date: NaiveDate::from_ymd_opt(2026, 7, 8).unwrap(),
            model: "gfs_ensemble".to_string(),
            member: "m".to_string(),
            max_temp_f,
            source: "open-meteo".to_string(),
        }
    }

    fn snapshot(ticker: &str, yes_price: f64) -> MarketSnapshot {
        MarketSnapshot {
            ticker: ticker.to_string(),
            ts: Utc::now(),
            yes_price: Some(yes_price),
            no_price: Some(1.0 - yes_price),
            volume: None,
            raw: json!({}),
        }
    }

    #[test]
    fn bounds_from_strike_fields() {
        let m = market(
            "KXHIGHNY-A",
            json!({"floor_strike": 85.0, "cap_strike": 87.0}),
            "",
        );
        assert_eq!(parse_bracket_bounds(&m), Some((Some(85.0), Some(87.0))));
    }

    #[test]
    fn bounds_from_title_phrases() {
        let below = market("T", json!({}), "Highest temperature below 83");
        assert_eq!(parse_bracket_bounds(&below), Some((None, Some(83.0))));

        let plus = market("T", json!({"subtitle": "87+"}), "");
        assert_eq!(parse_bracket_bounds(&plus), Some((Some(87.0), None)));

        let above = market("T", json!({}), "at least 90 degrees");
        assert_eq!(parse_bracket_bounds(&above), Some((Some(90.0), None)));

        // Integer ranges cover the whole upper degree.
        let range = market("T", json!({}), "83 to 84");
        assert_eq!(parse_bracket_bounds(&range), Some((Some(83.0), Some(85.0))));

        let fractional = market("T", json!({}), "83.5 to 84.5");
        assert_eq!(
            parse_bracket_bounds(&fractional),
            Some((Some(83.5), Some(84.5)))
        );

        assert_eq!(parse_bracket_bounds(&market("T", json!({}), "no bounds")), None);
    }

    #[test]
    fn probability_counts_members_in_half_open_interval() {
        let samples: Vec<WeatherEnsembleSample> =
            [84.0, 85.0, 86.0, 86.9, 87.0].iter().map(|t| sample(*t)).collect();
        let p = probability_for_bounds(&samples, Some(85.0), Some(87.0)).unwrap();
        assert!((p - 3.0 / 5.0).abs() < 1e-9);
        assert_eq!(probability_for_bounds(&[], Some(85.0), None), None);
    }

    #[test]
    fn confidence_combines_sample_and_edge_strength() {
        // 30 of 60 members and edge at exactly 3x the minimum.
        let c = weather_confidence(900.0, 30, 300);
        assert!((c - 0.5).abs() < 1e-9);
        // Saturated on both axes.
        assert_eq!(weather_confidence(5000.0, 120, 300), 1.0);
        assert_eq!(weather_confidence(0.0, 60, 300), 0.0);
    }

    #[test]
    fn signals_emitted_with_direction_and_edge() {
        let mut settings = Settings::default();
        settings.signals.min_edge_bps = 300;
        settings.signals.store_all = false;
        let markets = vec![market(
            "KXHIGHNY-26JUL08-B85",
            json!({"series_ticker": "KXHIGHNY", "floor_strike": 85.0, "cap_strike": 87.0}),
            "85 to 86",
        )];
        let samples: Vec<WeatherEnsembleSample> =
            (0..60).map(|i| sample(if i < 45 { 86.0 } else { 80.0 })).collect();
        let snapshots: HashMap<String, MarketSnapshot> = HashMap::from([(
            "KXHIGHNY-26JUL08-B85".to_string(),
            snapshot("KXHIGHNY-26JUL08-B85", 0.50),
        )]);

        let signals =
            build_weather_signals(&settings, &markets, &snapshots, &samples, Utc::now());
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.direction, Direction::BuyYes);
        assert!((signal.model_probability - 0.75).abs() < 1e-6);
        assert!((signal.edge_bps - 2500.0).abs() < 1e-6);
        assert!(
            (signal.edge_bps
                - (signal.model_probability - signal.market_probability) * 10000.0)
                .abs()
                < 0.01
        );
        assert_eq!(signal.confidence, 1.0);
    }

    #[test]
    fn flat_signals_dropped_unless_store_all() {
        let mut settings = Settings::default();
        settings.signals.min_edge_bps = 300;
        let markets = vec![market(
            "KXHIGHNY-26JUL08-B85",
            json!({"series_ticker": "KXHIGHNY", "floor_strike": 85.0, "cap_strike": 87.0}),
            "",
        )];
        let samples: Vec<WeatherEnsembleSample> =
            (0..60).map(|i| sample(if i < 30 { 86.0 } else { 80.0 })).collect();
        let snapshots: HashMap<String, MarketSnapshot> = HashMap::from([(
            "KXHIGHNY-26JUL08-B85".to_string(),
            snapshot("KXHIGHNY-26JUL08-B85", 0.50),
        )]);

        let dropped =
            build_weather_signals(&settings, &markets, &snapshots, &samples, Utc::now());
        assert!(dropped.is_empty());

        settings.signals.store_all = true;
        let kept =
            build_weather_signals(&settings, &markets, &snapshots, &samples, Utc::now());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].direction, Direction::Flat);
    }

    #[test]
    fn markets_without_snapshot_are_skipped() {
        let settings = Settings::default();
        let markets = vec![market(
            "KXHIGHNY-26JUL08-B85",
            json!({"series_ticker": "KXHIGHNY", "floor_strike": 85.0}),
            "",
        )];
        let samples = vec![sample(86.0)];
        let signals =
            build_weather_signals(&settings, &markets, &HashMap::new(), &samples, Utc::now());
        assert!(signals.is_empty());
    }
}
