//! Market resolution collector.
//!
//! Discovers recently-closed markets per target series, fetches each one's
//! settled status, and enriches same-day weather settlements from the NWS
//! climate report when the API omits the result.

use crate::application::signals::weather::parse_bracket_bounds;
use crate::domain::models::{Market, MarketResolution};
use crate::infrastructure::client::{
    as_f64, market_payload, parse_iso_datetime, KalshiClient,
};
use chrono::{DateTime, Duration, Utc};
use regex::RegexBuilder;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use tracing::warn;

const NWS_CLI_NYC_URL: &str =
    "https://forecast.weather.gov/product.php?site=OKX&product=CLI&issuedby=NYC";
const MAX_PAGES_PER_SERIES: usize = 4;
const PAGE_LIMIT: usize = 200;
const DEFAULT_LOOKBACK_HOURS: i64 = 48;
const MAX_CANDIDATES: usize = 250;

/// Today's observed NYC maximum, scraped from the CLI product text.
#[derive(Debug, Clone)]
pub struct NwsCliReading {
    pub max_temp_f: f64,
    pub raw_excerpt: String,
}

pub async fn fetch_nws_cli_nyc_max_temp(http: &reqwest::Client) -> Option<NwsCliReading> {
    let response = http
        .get(NWS_CLI_NYC_URL)
        .header("User-Agent", "kalshi-edge-bot/0.1 (research project)")
        .timeout(StdDuration::from_secs(20))
        .send()
        .await
        .ok()?
        .error_for_status()
        .ok()?;
    let text = response.text().await.ok()?;
    parse_nws_cli_max_temp(&text)
}

pub(crate) fn parse_nws_cli_max_temp(text: &str) -> Option<NwsCliReading> {
    let pattern = RegexBuilder::new(r"MAXIMUM TEMPERATURE.*?TODAY\s+(-?\d+)")
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .ok()?;
    let captures = pattern.captures(text)?;
    let max_temp_f: f64 = captures.get(1)?.as_str().parse().ok()?;
    let matched = captures.get(0)?.as_str();
    let raw_excerpt: String = matched.chars().take(200).collect();
    Some(NwsCliReading {
        max_temp_f,
        raw_excerpt,
    })
}

/// YES iff the observed value lands inside the bracket's half-open bounds.
pub fn result_for_bounds(value: f64, bounds: (Option<f64>, Option<f64>)) -> &'static str {
    let (lower, upper) = bounds;
    if let Some(lower) = lower {
        if value < lower {
            return "no";
        }
    }
    if let Some(upper) = upper {
        if value >= upper {
            return "no";
        }
    }
    "yes"
}

fn infer_market_type(series_ticker: Option<&str>, ticker: &str) -> &'static str {
    let series = series_ticker.unwrap_or("").to_uppercase();
    let ticker = ticker.to_uppercase();
    if series == "KXHIGHNY" || ticker.starts_with("KXHIGHNY") {
        return "weather";
    }
    if series == "KXBTC15M" || ticker.starts_with("KXBTC15M") {
        return "btc_15m";
    }
    "unknown"
}

async fn discover_resolution_candidates(
    client: &KalshiClient,
    base_url_override: Option<&str>,
    target_series_tickers: &[String],
    seed_tickers: &[String],
    now_utc: DateTime<Utc>,
    lookback_hours: i64,
) -> Vec<String> {
    let lookback_start = now_utc - Duration::hours(lookback_hours.max(1));
    let mut candidates: HashMap<String, Option<DateTime<Utc>>> = HashMap::new();
    for ticker in seed_tickers {
        let cleaned = ticker.trim();
        if !cleaned.is_empty() {
            candidates.insert(cleaned.to_string(), None);
        }
    }

    for series in target_series_tickers {
        let series_ticker = series.trim().to_uppercase();
        if series_ticker.is_empty() {
            continue;
        }
        let mut cursor: Option<String> = None;
        let mut pages_seen = 0;
        while pages_seen < MAX_PAGES_PER_SERIES {
            let mut params = vec![
                ("series_ticker".to_string(), series_ticker.clone()),
                ("limit".to_string(), PAGE_LIMIT.to_string()),
            ];
            if let Some(cursor_value) = &cursor {
                params.push(("cursor".to_string(), cursor_value.clone()));
            }
            let page = match client.list_markets_page(&params, base_url_override).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(series = %series_ticker, error = %e, "resolution_discovery_failed");
                    break;
                }
            };
            cursor = page.next_cursor();
            let rows = page.rows();
            if rows.is_empty() {
                break;
            }
            for row in rows {
                let ticker = row
                    .get("ticker")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if ticker.is_empty() {
                    continue;
                }
                let status = row
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase();
                let close_time = parse_iso_datetime(
                    row.get("close_time")
                        .or_else(|| row.get("expiration_time"))
                        .and_then(Value::as_str),
                );
                if status == "settled" {
                    candidates.insert(ticker, close_time);
                    continue;
                }
                if let Some(close) = close_time {
                    if close >= lookback_start && close <= now_utc {
                        candidates.insert(ticker, Some(close));
                    }
                }
            }
            pages_seen += 1;
            if cursor.is_none() {
                break;
            }
        }
    }

    let mut ordered: Vec<(String, Option<DateTime<Utc>>)> = candidates.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1));
    ordered.into_iter().map(|(ticker, _)| ticker).collect()
}

/// Fetch settled outcomes for recently-closed target markets.
pub async fn collect_market_resolutions(
    client: &KalshiClient,
    http: &reqwest::Client,
    market_tickers: &[String],
    target_series_tickers: &[String],
    base_url_override: Option<&str>,
    now_utc: DateTime<Utc>,
) -> Vec<MarketResolution> {
    let mut candidates = discover_resolution_candidates(
        client,
        base_url_override,
        target_series_tickers,
        market_tickers,
        now_utc,
        DEFAULT_LOOKBACK_HOURS,
    )
    .await;
    candidates.truncate(MAX_CANDIDATES);

    let mut nws_reading: Option<Option<NwsCliReading>> = None;
    let mut rows = Vec::new();
    for ticker in candidates {
        let payload = match client.get_market_detail(&ticker, base_url_override).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "resolution_fetch_failed");
                continue;
            }
        };
        let market = market_payload(&payload);
        let status = market
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        if status != "settled" {
            continue;
        }

        let mut result = market
            .get("result")
            .and_then(Value::as_str)
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty());
        let resolved_at = parse_iso_datetime(
            market
                .get("settled_time")
                .or_else(|| market.get("close_time"))
                .and_then(Value::as_str),
        );
        let mut actual_value = None;
        for key in [
            "settlement_value",
            "final_value",
            "strike_value",
            "underlying_price",
        ] {
            if let Some(value) = as_f64(market.get(key)) {
                actual_value = Some(value);
                break;
            }
        }

        let series_ticker = market
            .get("series_ticker")
            .and_then(Value::as_str)
            .map(str::to_string);
        let market_type = infer_market_type(series_ticker.as_deref(), &ticker);
        let mut resolution_source = "kalshi_api".to_string();

        // Same-day weather settlements sometimes publish before the API
        // carries the result; the climate report already knows the high.
        let settled_today = resolved_at
            .map(|at| at.date_naive() == now_utc.date_naive())
            .unwrap_or(false);
        if market_type == "weather" && result.is_none() && settled_today {
            if nws_reading.is_none() {
                nws_reading = Some(fetch_nws_cli_nyc_max_temp(http).await);
            }
            if let Some(Some(reading)) = &nws_reading {
                let bracket = Market {
                    ticker: ticker.clone(),
                    title: market
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    status: status.clone(),
                    close_time: None,
                    raw: market.clone(),
                };
                if let Some(bounds) = parse_bracket_bounds(&bracket) {
                    result = Some(result_for_bounds(reading.max_temp_f, bounds).to_string());
                    actual_value = actual_value.or(Some(reading.max_temp_f));
                    resolution_source = "nws_cli".to_string();
                }
            }
        }

        rows.push(MarketResolution {
            ticker: market
                .get("ticker")
                .and_then(Value::as_str)
                .unwrap_or(&ticker)
                .to_string(),
            series_ticker,
            event_ticker: market
                .get("event_ticker")
                .and_then(Value::as_str)
                .map(str::to_string),
            market_type: market_type.to_string(),
            resolved_at,
            result: result.or_else(|| Some("unknown".to_string())),
            actual_value,
            resolution_source,
            collected_at: now_utc,
        });
    }
    rows
}
