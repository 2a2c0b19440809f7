//! Kalshi REST client.
//!
//! Market discovery, snapshots, order books, candlestick history, and the
//! portfolio order surface. In stub mode every read is served by the mock
//! generator so the pipeline can run with no exchange access.

use crate::domain::models::{Market, MarketSnapshot};
use crate::domain::orderbook::OrderBookLevels;
use crate::infrastructure::client::auth::{AuthError, KalshiAuth};
use crate::infrastructure::client::mock::MockDataGenerator;
use crate::infrastructure::client::types::{
    as_f64, market_payload, parse_iso_datetime, MarketsPage,
};
use crate::infrastructure::config::{DiscoveryConfig, Settings};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RestError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API returned {status} for {path}")]
    Http { status: u16, path: String },

    #[error("Authentication failed: {0}")]
    AuthFailed(#[from] AuthError),

    #[error("Deserialization failed: {0}")]
    DeserializeFailed(String),

    #[error("Authentication required but no credentials configured")]
    AuthRequired,
}

pub type Result<T> = std::result::Result<T, RestError>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// REST client for the Kalshi trade API
pub struct KalshiClient {
    http: reqwest::Client,
    base_url: String,
    auth: Option<Arc<KalshiAuth>>,
    use_auth_for_public_data: bool,
    stub_mode: bool,
    discovery: DiscoveryConfig,
}

impl KalshiClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let auth = if settings.kalshi.api_key_id.trim().is_empty()
            || settings.kalshi.private_key_material.trim().is_empty()
        {
            None
        } else {
            Some(Arc::new(KalshiAuth::from_config(&settings.kalshi)?))
        };
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: settings.kalshi.base_url.trim_end_matches('/').to_string(),
            auth,
            use_auth_for_public_data: settings.kalshi.use_auth_for_public_data,
            stub_mode: settings.kalshi.stub_mode,
            discovery: settings.discovery.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_stub(&self) -> bool {
        self.stub_mode
    }

    /// Signed headers for a request or WebSocket upgrade at the given path.
    pub fn auth_headers(&self, method: &str, path: &str) -> Result<HashMap<String, String>> {
        let auth = self.auth.as_ref().ok_or(RestError::AuthRequired)?;
        Ok(auth.build_headers(method, path))
    }

    pub fn has_auth(&self) -> bool {
        self.auth.is_some()
    }

    pub async fn health_check(&self) -> Result<Value> {
        if self.stub_mode {
            return Ok(json!({"ok": true, "mode": "stub"}));
        }
        if self.use_auth_for_public_data {
            let payload = self
                .request_json(
                    reqwest::Method::GET,
                    "/trade-api/v2/portfolio/balance",
                    &[],
                    true,
                    None,
                )
                .await?;
            return Ok(json!({"ok": true, "mode": "live-auth", "balance": payload}));
        }
        self.request_json(
            reqwest::Method::GET,
            "/trade-api/v2/markets",
            &[("limit".to_string(), "1".to_string())],
            false,
            None,
        )
        .await?;
        Ok(json!({"ok": true, "mode": "live-public"}))
    }

    // =========================================================================
    // Market data
    // =========================================================================

    pub async fn list_markets(&self, limit: usize) -> Result<Vec<Market>> {
        if self.stub_mode {
            return Ok(MockDataGenerator::generate_markets(limit));
        }
        let rows = if !self.discovery.target_market_tickers.is_empty() {
            self.fetch_markets_by_ticker(&self.discovery.target_market_tickers, limit)
                .await?
        } else {
            let mut rows = self.discover_target_markets(limit).await?;
            if self.discovery.auto_select_live_contracts {
                rows = select_live_contract_rows(rows);
            }
            rows
        };
        let mut markets = Vec::with_capacity(rows.len());
        for row in rows {
            let ticker = row
                .get("ticker")
                .or_else(|| row.get("id"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string();
            if ticker.is_empty() {
                continue;
            }
            let title = row
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(&ticker)
                .to_string();
            let status = row
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let close_time = parse_iso_datetime(
                row.get("close_time")
                    .or_else(|| row.get("expiration_time"))
                    .and_then(Value::as_str),
            );
            markets.push(Market {
                ticker,
                title,
                status,
                close_time,
                raw: row,
            });
        }
        Ok(markets)
    }

    /// One page of the markets listing; used directly by the resolution
    /// collector's discovery walk.
    pub async fn list_markets_page(
        &self,
        params: &[(String, String)],
        base_url_override: Option<&str>,
    ) -> Result<MarketsPage> {
        if self.stub_mode {
            return Ok(MarketsPage::default());
        }
        let payload = self
            .request_json(
                reqwest::Method::GET,
                "/trade-api/v2/markets",
                params,
                false,
                base_url_override,
            )
            .await?;
        serde_json::from_value(payload).map_err(|e| RestError::DeserializeFailed(e.to_string()))
    }

    pub async fn get_market_detail(
        &self,
        ticker: &str,
        base_url_override: Option<&str>,
    ) -> Result<Value> {
        if self.stub_mode {
            let markets = MockDataGenerator::generate_markets(self.discovery.market_limit);
            if let Some(market) = markets.into_iter().find(|m| m.ticker == ticker) {
                return Ok(json!({"market": market.raw}));
            }
        }
        self.request_json(
            reqwest::Method::GET,
            &format!("/trade-api/v2/markets/{ticker}"),
            &[],
            false,
            base_url_override,
        )
        .await
    }

    pub async fn get_current_snapshot(&self, market: &Market) -> Result<MarketSnapshot> {
        if self.stub_mode {
            return Ok(MockDataGenerator::generate_current_snapshot(
                market,
                Utc::now(),
            ));
        }
        let payload = self.get_market_detail(&market.ticker, None).await?;
        let row = market_payload(&payload);
        let yes_price = as_f64(row.get("yes_ask"))
            .or_else(|| as_f64(row.get("yes_bid")))
            .or_else(|| as_f64(row.get("yes_price")))
            .or_else(|| as_f64(row.get("last_price")));
        let mut no_price = as_f64(row.get("no_ask"))
            .or_else(|| as_f64(row.get("no_bid")))
            .or_else(|| as_f64(row.get("no_price")));
        if no_price.is_none() {
            if let Some(yes) = yes_price {
                // Complement in whichever unit the quote came in.
                no_price = Some(if yes > 1.0 {
                    (100.0 - yes).max(0.0)
                } else {
                    ((1.0 - yes) * 1000.0).round() / 1000.0
                });
            }
        }
        Ok(MarketSnapshot {
            ticker: market.ticker.clone(),
            ts: Utc::now(),
            yes_price,
            no_price,
            volume: as_f64(row.get("volume")),
            raw: row.clone(),
        })
    }

    /// Candlestick history, trying the two endpoint shapes the API has
    /// shipped. 404/400 on one shape falls through to the next.
    pub async fn get_historical_snapshots(
        &self,
        market: &Market,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MarketSnapshot>> {
        if self.stub_mode {
            return Ok(MockDataGenerator::generate_historical_snapshots(
                market, start, end,
            ));
        }
        let series = market.series_ticker();
        let mut attempts: Vec<(String, Vec<(String, String)>)> = vec![(
            format!("/trade-api/v2/markets/{}/candlesticks", market.ticker),
            vec![
                ("start".to_string(), start.to_rfc3339()),
                ("end".to_string(), end.to_rfc3339()),
                ("period_interval".to_string(), "60".to_string()),
            ],
        )];
        if !series.is_empty() {
            attempts.push((
                format!(
                    "/trade-api/v2/markets/{}/{}/candlesticks",
                    series, market.ticker
                ),
                vec![
                    ("start_ts".to_string(), start.timestamp().to_string()),
                    ("end_ts".to_string(), end.timestamp().to_string()),
                    ("period_interval".to_string(), "1".to_string()),
                ],
            ));
        }

        let mut payload: Option<Value> = None;
        for (path, params) in attempts {
            match self
                .request_json(reqwest::Method::GET, &path, &params, false, None)
                .await
            {
                Ok(found) => {
                    payload = Some(found);
                    break;
                }
                Err(RestError::Http { status, .. }) if status == 404 || status == 400 => continue,
                Err(e) => return Err(e),
            }
        }
        let payload = match payload {
            Some(payload) => payload,
            None => {
                info!(ticker = %market.ticker, "no candlestick endpoint available");
                return Ok(Vec::new());
            }
        };

        let rows = payload
            .get("candlesticks")
            .or_else(|| payload.get("candles"))
            .or_else(|| payload.get("data"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let ts = row
                .get("end_period_ts")
                .or_else(|| row.get("end_ts"))
                .or_else(|| row.get("ts"))
                .and_then(|v| candle_timestamp(v));
            let ts = match ts {
                Some(ts) => ts,
                None => continue,
            };
            let yes_price = as_f64(row.get("close_yes"))
                .or_else(|| as_f64(row.get("yes_price")))
                .or_else(|| as_f64(row.get("close")));
            let mut no_price =
                as_f64(row.get("close_no")).or_else(|| as_f64(row.get("no_price")));
            if no_price.is_none() {
                if let Some(yes) = yes_price {
                    no_price = Some(if yes > 1.0 {
                        (100.0 - yes).max(0.0)
                    } else {
                        ((1.0 - yes) * 1000.0).round() / 1000.0
                    });
                }
            }
            snapshots.push(MarketSnapshot {
                ticker: market.ticker.clone(),
                ts,
                yes_price,
                no_price,
                volume: as_f64(row.get("volume")),
                raw: row,
            });
        }
        Ok(snapshots)
    }

    pub async fn get_orderbook(&self, ticker: &str) -> Result<OrderBookLevels> {
        if self.stub_mode {
            return Ok(MockDataGenerator::generate_orderbook(ticker, Utc::now()));
        }
        let payload = self
            .request_json(
                reqwest::Method::GET,
                &format!("/trade-api/v2/markets/{ticker}/orderbook"),
                &[],
                false,
                None,
            )
            .await?;
        Ok(OrderBookLevels::from_value(&payload))
    }

    // =========================================================================
    // Portfolio / orders
    // =========================================================================

    pub async fn place_order(
        &self,
        ticker: &str,
        side: &str,
        count: i64,
        price_cents: i64,
        base_url: &str,
    ) -> Result<Value> {
        let body = json!({
            "ticker": ticker,
            "side": side,
            "count": count,
            "price_cents": price_cents,
            "action": "buy",
            "type": "limit",
        });
        self.request_json_body(
            reqwest::Method::POST,
            "/trade-api/v2/portfolio/orders",
            &body,
            Some(base_url),
        )
        .await
    }

    pub async fn cancel_order(&self, order_id: &str, base_url: &str) -> Result<Value> {
        self.request_json(
            reqwest::Method::DELETE,
            &format!("/trade-api/v2/portfolio/orders/{order_id}"),
            &[],
            true,
            Some(base_url),
        )
        .await
    }

    pub async fn get_order_status(&self, order_id: &str, base_url: &str) -> Result<Value> {
        self.request_json(
            reqwest::Method::GET,
            &format!("/trade-api/v2/portfolio/orders/{order_id}"),
            &[],
            true,
            Some(base_url),
        )
        .await
    }

    pub async fn get_queue_positions(&self, base_url: &str) -> Result<Value> {
        self.request_json(
            reqwest::Method::GET,
            "/trade-api/v2/portfolio/orders/queue_positions",
            &[],
            true,
            Some(base_url),
        )
        .await
    }

    pub async fn get_balance(&self, base_url: &str) -> Result<Value> {
        self.request_json(
            reqwest::Method::GET,
            "/trade-api/v2/portfolio/balance",
            &[],
            true,
            Some(base_url),
        )
        .await
    }

    // =========================================================================
    // Discovery internals
    // =========================================================================

    async fn fetch_markets_by_ticker(
        &self,
        tickers: &[String],
        limit: usize,
    ) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for ticker in tickers.iter().take(limit) {
            let payload = self.get_market_detail(ticker, None).await?;
            let mut row = market_payload(&payload).clone();
            if !row.is_object() {
                continue;
            }
            if row.get("ticker").and_then(Value::as_str).unwrap_or("").is_empty() {
                row["ticker"] = json!(ticker);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn discover_target_markets(&self, limit: usize) -> Result<Vec<Value>> {
        let limit_param = limit.clamp(1, 1000).to_string();
        let mut matched: HashMap<String, Value> = HashMap::new();

        self.discovery_pass(
            &limit_param,
            Some(self.discovery.target_market_status.as_str()),
            &mut matched,
        )
        .await;
        // Retry once without the status filter; some series only list
        // markets under other statuses.
        if matched.is_empty() && !self.discovery.target_market_status.is_empty() {
            info!(
                status = %self.discovery.target_market_status,
                "no markets matched with status filter; retrying without it"
            );
            self.discovery_pass(&limit_param, None, &mut matched).await;
        }

        let mut rows: Vec<Value> = matched.into_values().collect();
        rows.truncate(limit);
        Ok(rows)
    }

    async fn discovery_pass(
        &self,
        limit_param: &str,
        status: Option<&str>,
        matched: &mut HashMap<String, Value>,
    ) {
        let series_list: Vec<Option<String>> = if self.discovery.target_series_tickers.is_empty() {
            vec![None]
        } else {
            self.discovery
                .target_series_tickers
                .iter()
                .map(|series| Some(series.trim().to_uppercase()))
                .collect()
        };

        for series in series_list {
            let mut cursor: Option<String> = None;
            let mut pages_seen = 0usize;
            while pages_seen < self.discovery.discovery_pages.max(1) {
                let mut params: Vec<(String, String)> =
                    vec![("limit".to_string(), limit_param.to_string())];
                if let Some(status) = status.filter(|s| !s.is_empty()) {
                    params.push(("status".to_string(), status.to_string()));
                }
                if let Some(series) = &series {
                    params.push(("series_ticker".to_string(), series.clone()));
                }
                if let Some(cursor_value) = &cursor {
                    params.push(("cursor".to_string(), cursor_value.clone()));
                }

                let page = match self.list_markets_page(&params, None).await {
                    Ok(page) => page,
                    Err(e) => {
                        warn!(error = %e, series = ?series, "market_discovery_page_failed");
                        break;
                    }
                };
                cursor = page.next_cursor();
                let rows = page.rows();
                if rows.is_empty() {
                    break;
                }
                for mut row in rows {
                    let ticker = row
                        .get("ticker")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .trim()
                        .to_string();
                    if ticker.is_empty() {
                        continue;
                    }
                    if let Some(series) = &series {
                        // The query is already scoped; trust it, but
                        // backfill series_ticker on rows that omit it.
                        let row_series = row
                            .get("series_ticker")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_uppercase();
                        if !row_series.is_empty() && &row_series != series {
                            continue;
                        }
                        if row_series.is_empty() {
                            row["series_ticker"] = json!(series);
                        }
                        matched.insert(ticker, row);
                        continue;
                    }
                    if self.matches_targets(&row) {
                        matched.insert(ticker, row);
                    }
                }
                pages_seen += 1;
                if cursor.is_none() {
                    break;
                }
            }
        }
    }

    fn matches_targets(&self, row: &Value) -> bool {
        let ticker = row
            .get("ticker")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_uppercase();
        let event_ticker = row
            .get("event_ticker")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_uppercase();
        let series_ticker = row
            .get("series_ticker")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_uppercase();
        if self
            .discovery
            .target_event_tickers
            .iter()
            .any(|t| t.to_uppercase() == event_ticker && !event_ticker.is_empty())
        {
            return true;
        }
        if self
            .discovery
            .target_series_tickers
            .iter()
            .any(|t| t.to_uppercase() == series_ticker && !series_ticker.is_empty())
        {
            return true;
        }
        let text = market_text(row);
        for group in &self.discovery.target_market_query_groups {
            let tokens = tokenize_group(group);
            if !tokens.is_empty() && tokens.iter().all(|token| text.contains(token)) {
                return true;
            }
        }
        self.discovery
            .target_market_tickers
            .iter()
            .any(|t| t.to_uppercase() == ticker)
    }

    // =========================================================================
    // Transport
    // =========================================================================

    async fn request_json(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(String, String)],
        require_auth: bool,
        base_url_override: Option<&str>,
    ) -> Result<Value> {
        let base = base_url_override
            .unwrap_or(&self.base_url)
            .trim_end_matches('/');
        let url = format!("{base}{path}");
        debug!(%url, "kalshi_request");
        let mut request = self
            .http
            .request(method.clone(), &url)
            .timeout(REQUEST_TIMEOUT)
            .header("Accept", "application/json");
        if !params.is_empty() {
            request = request.query(params);
        }
        if require_auth || self.use_auth_for_public_data {
            for (key, value) in self.auth_headers(method.as_str(), path)? {
                request = request.header(key, value);
            }
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RestError::Http {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| RestError::DeserializeFailed(e.to_string()))?;
        Ok(payload)
    }

    async fn request_json_body(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &Value,
        base_url_override: Option<&str>,
    ) -> Result<Value> {
        let base = base_url_override
            .unwrap_or(&self.base_url)
            .trim_end_matches('/');
        let url = format!("{base}{path}");
        debug!(%url, "kalshi_request");
        let mut request = self
            .http
            .request(method.clone(), &url)
            .timeout(REQUEST_TIMEOUT)
            .header("Accept", "application/json")
            .json(body);
        for (key, value) in self.auth_headers(method.as_str(), path)? {
            request = request.header(key, value);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RestError::Http {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| RestError::DeserializeFailed(e.to_string()))
    }
}

fn candle_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(epoch) = value.as_i64() {
        return DateTime::from_timestamp(epoch, 0);
    }
    parse_iso_datetime(value.as_str())
}

fn market_text(row: &Value) -> String {
    [
        "ticker",
        "title",
        "subtitle",
        "event_ticker",
        "series_ticker",
    ]
    .iter()
    .map(|key| row.get(*key).and_then(Value::as_str).unwrap_or(""))
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}

fn tokenize_group(group: &str) -> Vec<String> {
    const STOPWORDS: [&str; 10] = ["the", "a", "an", "in", "for", "at", "to", "of", "will", "be"];
    group
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty() && !STOPWORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Keep only the most relevant live contracts: the nearest-to-close
/// weather bracket set plus the next BTC contract.
fn select_live_contract_rows(rows: Vec<Value>) -> Vec<Value> {
    if rows.is_empty() {
        return rows;
    }
    let now = Utc::now();

    let is_series = |row: &Value, series: &str| {
        row.get("series_ticker")
            .and_then(Value::as_str)
            .map(|s| s.to_uppercase() == series)
            .unwrap_or(false)
            || row
                .get("ticker")
                .and_then(Value::as_str)
                .map(|t| t.to_uppercase().starts_with(series))
                .unwrap_or(false)
    };
    let close_time = |row: &Value| {
        parse_iso_datetime(
            row.get("close_time")
                .or_else(|| row.get("expiration_time"))
                .and_then(Value::as_str),
        )
    };

    let weather_rows: Vec<&Value> = rows.iter().filter(|r| is_series(r, "KXHIGHNY")).collect();
    let btc_rows: Vec<&Value> = rows.iter().filter(|r| is_series(r, "KXBTC15M")).collect();

    let mut selected: Vec<Value> = Vec::new();

    if !weather_rows.is_empty() {
        let mut by_event: HashMap<String, Vec<&Value>> = HashMap::new();
        for row in &weather_rows {
            let event = row
                .get("event_ticker")
                .or_else(|| row.get("event"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| {
                    row.get("ticker")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .split('-')
                        .next()
                        .unwrap_or("")
                        .to_string()
                });
            by_event.entry(event).or_default().push(row);
        }
        // Rank events: live sets first by soonest final close, then the
        // most recently closed set.
        let best_event = by_event.values().min_by(|a, b| {
            let key = |event_rows: &Vec<&Value>| {
                let latest_close = event_rows.iter().filter_map(|r| close_time(r)).max();
                match latest_close {
                    Some(close) if close >= now => (0u8, close.timestamp()),
                    Some(close) => (1u8, -close.timestamp()),
                    None => (2u8, i64::MAX),
                }
            };
            key(a).cmp(&key(b))
        });
        if let Some(event_rows) = best_event {
            selected.extend(event_rows.iter().map(|r| (*r).clone()));
        }
    }

    if !btc_rows.is_empty() {
        let future: Vec<&&Value> = btc_rows
            .iter()
            .filter(|r| close_time(r).map(|c| c >= now).unwrap_or(true))
            .collect();
        let chosen = if !future.is_empty() {
            future
                .into_iter()
                .min_by_key(|r| close_time(r).map(|c| c.timestamp()).unwrap_or(i64::MAX))
        } else {
            btc_rows
                .iter()
                .max_by_key(|r| close_time(r).map(|c| c.timestamp()).unwrap_or(i64::MIN))
        };
        if let Some(row) = chosen {
            selected.push((*row).clone());
        }
    }

    if selected.is_empty() {
        return rows;
    }
    let mut unique: HashMap<String, Value> = HashMap::new();
    for row in selected {
        if let Some(ticker) = row.get("ticker").and_then(Value::as_str) {
            if !ticker.trim().is_empty() {
                unique.insert(ticker.to_string(), row);
            }
        }
    }
    unique.into_values().collect()
}
