//! Unified fresh-price access: WebSocket first, stored ticks next, REST
//! last.

use crate::application::signals::{SpotQuote, SpotQuotes};
use crate::domain::models::{MarketSnapshot, PriceTier, SpotSource};
use crate::domain::orderbook::OrderBookLevels;
use crate::infrastructure::client::{as_f64, market_payload, KalshiClient};
use crate::infrastructure::database::MarketStore;
use crate::infrastructure::ws::{KalshiFeed, SpotFeedView};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// WS ticks older than this fall through to the stored-tick tier.
const WS_MAX_AGE_SECONDS: f64 = 5.0;
/// Stored ticks older than this are not served at all.
const DB_MAX_AGE_SECONDS: f64 = 30.0;
/// WS books older than this fall through to REST.
const BOOK_MAX_AGE_SECONDS: f64 = 10.0;

/// REST reads the provider may fall back to
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    async fn fetch_orderbook(&self, ticker: &str) -> Option<OrderBookLevels>;
    async fn fetch_market_detail(&self, ticker: &str) -> Option<Value>;
}

#[async_trait]
impl MarketDataClient for KalshiClient {
    async fn fetch_orderbook(&self, ticker: &str) -> Option<OrderBookLevels> {
        match self.get_orderbook(ticker).await {
            Ok(book) => Some(book),
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "orderbook_rest_fetch_failed");
                None
            }
        }
    }

    async fn fetch_market_detail(&self, ticker: &str) -> Option<Value> {
        match self.get_market_detail(ticker, None).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "market_detail_fetch_failed");
                None
            }
        }
    }
}

/// Read surface of the Kalshi order-book feed
pub trait KalshiBookView: Send + Sync {
    fn is_connected(&self) -> bool;
    fn has_orderbook(&self, ticker: &str) -> bool;
    fn orderbook_age_seconds(&self, ticker: &str) -> Option<f64>;
    fn orderbook(&self, ticker: &str) -> Option<OrderBookLevels>;
}

impl KalshiBookView for KalshiFeed {
    fn is_connected(&self) -> bool {
        KalshiFeed::is_connected(self)
    }

    fn has_orderbook(&self, ticker: &str) -> bool {
        KalshiFeed::has_orderbook(self, ticker)
    }

    fn orderbook_age_seconds(&self, ticker: &str) -> Option<f64> {
        KalshiFeed::orderbook_age_seconds(self, ticker)
    }

    fn orderbook(&self, ticker: &str) -> Option<OrderBookLevels> {
        KalshiFeed::orderbook(self, ticker)
    }
}

/// WS-first accessor over every price source the bot consumes
pub struct PriceProvider {
    binance: Option<Arc<dyn SpotFeedView>>,
    coinbase: Option<Arc<dyn SpotFeedView>>,
    kraken: Option<Arc<dyn SpotFeedView>>,
    kalshi: Option<Arc<dyn KalshiBookView>>,
    store: Arc<dyn MarketStore>,
    client: Arc<dyn MarketDataClient>,
    btc_symbol: String,
}

impl PriceProvider {
    pub fn new(
        binance: Option<Arc<dyn SpotFeedView>>,
        coinbase: Option<Arc<dyn SpotFeedView>>,
        kraken: Option<Arc<dyn SpotFeedView>>,
        kalshi: Option<Arc<dyn KalshiBookView>>,
        store: Arc<dyn MarketStore>,
        client: Arc<dyn MarketDataClient>,
        btc_symbol: impl Into<String>,
    ) -> Self {
        Self {
            binance,
            coinbase,
            kraken,
            kalshi,
            store,
            client,
            btc_symbol: btc_symbol.into(),
        }
    }

    /// Freshest quote per venue: live feed when younger than 5 s, else
    /// the latest stored tick when younger than 30 s, else nothing.
    pub async fn get_btc_prices(&self) -> SpotQuotes {
        let mut quotes = SpotQuotes::new();
        let feeds: [(SpotSource, &Option<Arc<dyn SpotFeedView>>); 3] = [
            (SpotSource::Binance, &self.binance),
            (SpotSource::Coinbase, &self.coinbase),
            (SpotSource::Kraken, &self.kraken),
        ];
        for (source, feed) in feeds {
            if let Some(feed) = feed {
                if feed.is_connected() && feed.age_seconds() < WS_MAX_AGE_SECONDS {
                    if let (Some(price), Some(ts)) =
                        (feed.latest_price(), feed.last_update_time())
                    {
                        quotes.insert(
                            source,
                            SpotQuote {
                                price,
                                ts,
                                tier: PriceTier::Ws,
                            },
                        );
                        continue;
                    }
                }
            }
            let fallback = self
                .store
                .get_latest_spot_tick(source, &self.btc_symbol)
                .await
                .ok()
                .flatten();
            if let Some(tick) = fallback {
                if tick.age_seconds(Utc::now()) <= DB_MAX_AGE_SECONDS {
                    quotes.insert(
                        source,
                        SpotQuote {
                            price: tick.price_usd,
                            ts: tick.ts,
                            tier: PriceTier::RestFallback,
                        },
                    );
                }
            }
        }
        quotes
    }

    /// Fractional price change over the window: live trade history when
    /// the Binance feed is up, else stored ticks. Needs two points.
    pub async fn get_btc_momentum(&self, window_seconds: i64) -> Option<f64> {
        if let Some(binance) = &self.binance {
            if binance.is_connected() {
                let history = binance.price_history_window(window_seconds);
                if history.len() >= 2 && history[0] > 0.0 {
                    return Some((history[history.len() - 1] - history[0]) / history[0]);
                }
            }
        }
        let since = Utc::now() - Duration::seconds(window_seconds.max(10));
        let ticks = self
            .store
            .get_recent_spot_ticks(&self.btc_symbol, since)
            .await
            .ok()?;
        let prices: Vec<f64> = ticks
            .iter()
            .map(|tick| tick.price_usd)
            .filter(|price| *price > 0.0)
            .collect();
        if prices.len() < 2 || prices[0] <= 0.0 {
            return None;
        }
        Some((prices[prices.len() - 1] - prices[0]) / prices[0])
    }

    /// Book for a ticker with its provenance tier.
    pub async fn get_kalshi_orderbook(
        &self,
        ticker: &str,
    ) -> Option<(OrderBookLevels, PriceTier)> {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return None;
        }
        if let Some(feed) = &self.kalshi {
            if feed.is_connected() && feed.has_orderbook(&ticker) {
                let fresh = feed
                    .orderbook_age_seconds(&ticker)
                    .map(|age| age <= BOOK_MAX_AGE_SECONDS)
                    .unwrap_or(true);
                if fresh {
                    if let Some(book) = feed.orderbook(&ticker) {
                        return Some((book, PriceTier::Ws));
                    }
                }
            }
        }
        self.client
            .fetch_orderbook(&ticker)
            .await
            .map(|book| (book, PriceTier::Rest))
    }

    /// Snapshot derived from the freshest book, else the market endpoint.
    pub async fn get_market_snapshot(&self, ticker: &str) -> Option<MarketSnapshot> {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return None;
        }
        let now_utc = Utc::now();

        if let Some((book, tier)) = self.get_kalshi_orderbook(&ticker).await {
            if !book.is_empty() {
                let yes_bid = book.best_yes_bid();
                let no_bid = book.best_no_bid();
                let yes_ask = book.best_yes_ask();
                let no_ask = book.best_no_ask();
                let yes_price = yes_ask.map(|cents| cents as f64 / 100.0);
                let no_price = no_ask.map(|cents| cents as f64 / 100.0);
                return Some(MarketSnapshot {
                    ticker,
                    ts: now_utc,
                    yes_price,
                    no_price,
                    volume: None,
                    raw: json!({
                        "source": tier.as_str(),
                        "yes_bid": yes_bid,
                        "yes_ask": yes_ask,
                        "no_bid": no_bid,
                        "no_ask": no_ask,
                    }),
                });
            }
        }

        let payload = self.client.fetch_market_detail(&ticker).await?;
        let market = market_payload(&payload);
        let normalize = |value: Option<f64>| {
            value.map(|v| if v > 1.0 { v / 100.0 } else { v })
        };
        let yes_price = normalize(
            as_f64(market.get("yes_ask")).or_else(|| as_f64(market.get("yes_bid"))),
        );
        let no_price = normalize(
            as_f64(market.get("no_ask")).or_else(|| as_f64(market.get("no_bid"))),
        );
        Some(MarketSnapshot {
            ticker,
            ts: now_utc,
            yes_price,
            no_price,
            volume: as_f64(market.get("volume")),
            raw: market.clone(),
        })
    }
}
