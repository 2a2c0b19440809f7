//! Typed extraction helpers for exchange payloads.
//!
//! Vendor JSON is normalized here, once; downstream code never walks
//! dynamic payloads itself.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// One page of the paginated markets listing
#[derive(Debug, Default, Deserialize)]
pub struct MarketsPage {
    #[serde(default)]
    pub markets: Vec<Value>,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub cursor: Option<String>,
}

impl MarketsPage {
    /// Rows regardless of which field the API used.
    pub fn rows(self) -> Vec<Value> {
        if !self.markets.is_empty() {
            self.markets
        } else {
            self.data
        }
    }

    pub fn next_cursor(&self) -> Option<String> {
        self.cursor
            .as_deref()
            .map(str::trim)
            .filter(|cursor| !cursor.is_empty())
            .map(str::to_string)
    }
}

/// Unwrap `{market: {...}}` detail responses (some endpoints return the
/// object bare).
pub fn market_payload(payload: &Value) -> &Value {
    payload.get("market").unwrap_or(payload)
}

/// Lenient float extraction: numbers or numeric strings.
pub fn as_f64(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    if let Some(v) = value.as_f64() {
        return Some(v);
    }
    value.as_str().and_then(|s| s.trim().parse().ok())
}

/// Lenient integer extraction: numbers or numeric strings.
pub fn as_i64(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    if let Some(v) = value.as_i64() {
        return Some(v);
    }
    if let Some(v) = value.as_f64() {
        return Some(v as i64);
    }
    value.as_str().and_then(|s| s.trim().parse().ok())
}

/// Parse RFC 3339 timestamps, tolerating a trailing `Z` and missing
/// offsets (assumed UTC).
pub fn parse_iso_datetime(value: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let candidate = raw.replace('Z', "+00:00");
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&candidate) {
        return Some(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Swap an http(s) REST base for the exchange's trading WebSocket URL.
pub fn build_ws_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    let host = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let host = host.split('/').next().unwrap_or(host);
    format!("wss://{host}/trade-api/ws/v2")
}
