//! BTC spot price collector.
//!
//! Polls the public spot endpoints; any single venue failing is logged
//! and skipped. Bitstamp is only consulted when every primary venue
//! failed.

use crate::domain::models::{SpotSource, SpotTick};
use crate::infrastructure::config::Settings;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch one tick per reachable venue.
pub async fn fetch_btc_spot_ticks(
    settings: &Settings,
    http: &reqwest::Client,
    now_utc: DateTime<Utc>,
) -> Vec<SpotTick> {
    let symbol = settings.btc.symbol.clone();
    let mut ticks = Vec::new();

    // Binance can be geo-restricted in some regions; one venue failing
    // never stops collection.
    match fetch_json(
        http,
        "https://api.binance.com/api/v3/ticker/price",
        &[("symbol", "BTCUSDT")],
    )
    .await
    {
        Ok(payload) => {
            if let Some(price) = parse_binance_price(&payload) {
                ticks.push(tick(now_utc, SpotSource::Binance, &symbol, price, payload));
            }
        }
        Err(e) => warn!(source = "binance", error = %e, "btc_source_failed"),
    }

    match fetch_json(
        http,
        "https://api.exchange.coinbase.com/products/BTC-USD/ticker",
        &[],
    )
    .await
    {
        Ok(payload) => {
            if let Some(price) = parse_coinbase_price(&payload) {
                ticks.push(tick(now_utc, SpotSource::Coinbase, &symbol, price, payload));
            }
        }
        Err(e) => warn!(source = "coinbase", error = %e, "btc_source_failed"),
    }

    match fetch_json(
        http,
        "https://api.kraken.com/0/public/Ticker",
        &[("pair", "XBTUSD")],
    )
    .await
    {
        Ok(payload) => {
            if let Some(price) = parse_kraken_price(&payload) {
                ticks.push(tick(now_utc, SpotSource::Kraken, &symbol, price, payload));
            }
        }
        Err(e) => warn!(source = "kraken", error = %e, "btc_source_failed"),
    }

    if ticks.is_empty() {
        match fetch_json(http, "https://www.bitstamp.net/api/v2/ticker/btcusd/", &[]).await {
            Ok(payload) => {
                if let Some(price) = parse_bitstamp_price(&payload) {
                    ticks.push(tick(now_utc, SpotSource::Bitstamp, &symbol, price, payload));
                }
            }
            Err(e) => warn!(source = "bitstamp", error = %e, "btc_source_failed"),
        }
    }

    ticks
}

async fn fetch_json(
    http: &reqwest::Client,
    url: &str,
    params: &[(&str, &str)],
) -> Result<Value, reqwest::Error> {
    let mut request = http.get(url).timeout(REQUEST_TIMEOUT);
    if !params.is_empty() {
        request = request.query(params);
    }
    let response = request.send().await?.error_for_status()?;
    response.json().await
}

fn tick(
    ts: DateTime<Utc>,
    source: SpotSource,
    symbol: &str,
    price_usd: f64,
    raw: Value,
) -> SpotTick {
    SpotTick {
        ts,
        source,
        symbol: symbol.to_string(),
        price_usd,
        raw,
    }
}

fn parse_price_field(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    let price = if let Some(v) = value.as_f64() {
        v
    } else {
        value.as_str()?.trim().parse().ok()?
    };
    (price > 0.0).then_some(price)
}

pub(crate) fn parse_binance_price(payload: &Value) -> Option<f64> {
    parse_price_field(payload.get("price"))
}

pub(crate) fn parse_coinbase_price(payload: &Value) -> Option<f64> {
    parse_price_field(payload.get("price"))
}

/// Kraken nests the close array under a pair-keyed result object.
pub(crate) fn parse_kraken_price(payload: &Value) -> Option<f64> {
    let result = payload.get("result")?.as_object()?;
    for pair in result.values() {
        let close = pair.get("c").and_then(Value::as_array);
        if let Some(price) = close.and_then(|values| parse_price_field(values.first())) {
            return Some(price);
        }
    }
    None
}

pub(crate) fn parse_bitstamp_price(payload: &Value) -> Option<f64> {
    parse_price_field(payload.get("last"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binance_price_string() {
        assert_eq!(
            parse_binance_price(&json!({"symbol": "BTCUSDT", "price": "118000.10"})),
            Some(118000.10)
        );
        assert_eq!(parse_binance_price(&json!({"price": "0"})), None);
        assert_eq!(parse_binance_price(&json!({})), None);
    }

    #[test]
    fn kraken_price_from_close_array() {
        let payload = json!({
            "error": [],
            "result": {
                "XXBTZUSD": {"c": ["118432.5", "0.001"], "v": ["12", "300"]}
            }
        });
        assert_eq!(parse_kraken_price(&payload), Some(118432.5));
        assert_eq!(parse_kraken_price(&json!({"result": {}})), None);
        assert_eq!(parse_kraken_price(&json!({"error": ["boom"]})), None);
    }

    #[test]
    fn bitstamp_uses_last_field() {
        assert_eq!(
            parse_bitstamp_price(&json!({"last": "117950.00"})),
            Some(117950.0)
        );
    }
}
