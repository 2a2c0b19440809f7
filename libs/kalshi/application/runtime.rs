//! Task supervisor: WebSocket feeds, the poll loop, the realtime BTC
//! loop, command intake, lifecycle-driven subscriptions, and the WS/REST
//! health audit.

use crate::application::pipeline::DataPipeline;
use crate::application::price_provider::PriceProvider;
use crate::domain::models::AlertEvent;
use crate::infrastructure::client::KalshiClient;
use crate::infrastructure::config::Settings;
use crate::infrastructure::ws::{
    BinanceFeed, CoinbaseFeed, KalshiFeed, KrakenFeed, LifecycleEvent, SpotFeedView,
};
use crate::utils::heartbeat::Heartbeat;
use crate::utils::shutdown::ShutdownManager;
use chrono::Utc;
use crossbeam_channel::Receiver;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Seconds between realtime BTC passes.
const REALTIME_BTC_INTERVAL_SECS: u64 = 15;
/// Seconds between command polls.
const COMMAND_POLL_INTERVAL_SECS: u64 = 2;
/// Seconds between WS/REST health audits.
const HEALTH_AUDIT_INTERVAL_SECS: u64 = 60;
/// Cents of divergence tolerated before the audit alerts.
const HEALTH_AUDIT_MAX_DIVERGENCE_CENTS: i64 = 2;
/// Tickers sampled per audit pass.
const HEALTH_AUDIT_SAMPLE: usize = 3;
/// Seconds between supervise-loop status heartbeats.
const STATUS_HEARTBEAT_INTERVAL_SECS: u64 = 300;
/// Budget for feeds to close before tasks are aborted.
const FEED_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Owns the long-lived tasks and their shutdown ordering
pub struct BotRuntime {
    settings: Settings,
    pipeline: Arc<DataPipeline>,
    client: Arc<KalshiClient>,
    binance: Arc<BinanceFeed>,
    coinbase: Arc<CoinbaseFeed>,
    kraken: Arc<KrakenFeed>,
    kalshi_feed: Option<Arc<KalshiFeed>>,
    lifecycle_rx: Option<Receiver<LifecycleEvent>>,
    shutdown: Arc<ShutdownManager>,
}

impl BotRuntime {
    /// Build the feed set and wire the price provider into the pipeline.
    ///
    /// The Kalshi feed needs signing credentials; without them (or in
    /// stub mode) the pipeline simply runs on REST books.
    pub fn new(
        settings: Settings,
        pipeline: Arc<DataPipeline>,
        client: Arc<KalshiClient>,
    ) -> Self {
        let binance = Arc::new(BinanceFeed::new());
        let coinbase = Arc::new(CoinbaseFeed::new());
        let kraken = Arc::new(KrakenFeed::new());

        let (kalshi_feed, lifecycle_rx) = if !settings.kalshi.stub_mode && client.has_auth() {
            let (feed, lifecycle_rx) = KalshiFeed::new(Arc::clone(&client));
            (Some(Arc::new(feed)), Some(lifecycle_rx))
        } else {
            info!("kalshi_ws_disabled (stub mode or no credentials)");
            (None, None)
        };

        let provider = Arc::new(PriceProvider::new(
            Some(Arc::clone(&binance) as Arc<dyn SpotFeedView>),
            Some(Arc::clone(&coinbase) as Arc<dyn SpotFeedView>),
            Some(Arc::clone(&kraken) as Arc<dyn SpotFeedView>),
            kalshi_feed
                .as_ref()
                .map(|feed| Arc::clone(feed) as Arc<dyn crate::application::price_provider::KalshiBookView>),
            pipeline.store(),
            Arc::clone(&client) as Arc<dyn crate::application::price_provider::MarketDataClient>,
            settings.btc.symbol.clone(),
        ));
        pipeline.set_price_provider(provider);

        Self {
            settings,
            pipeline,
            client,
            binance,
            coinbase,
            kraken,
            kalshi_feed,
            lifecycle_rx,
            shutdown: Arc::new(ShutdownManager::new()),
        }
    }

    pub fn shutdown_handle(&self) -> &ShutdownManager {
        self.shutdown.as_ref()
    }

    async fn bootstrap_subscriptions(&self) {
        let feed = match &self.kalshi_feed {
            Some(feed) => feed,
            None => return,
        };
        match self
            .client
            .list_markets(self.settings.discovery.market_limit)
            .await
        {
            Ok(markets) => {
                for market in &markets {
                    feed.subscribe_market(&market.ticker);
                }
            }
            Err(e) => warn!(error = %e, "kalshi_ws_bootstrap_failed"),
        }
        feed.subscribe_lifecycle();
    }

    /// Run everything until shutdown; closes feeds first, then lets the
    /// in-flight tick finish.
    pub async fn run(self) {
        self.shutdown.spawn_signal_handler();
        self.bootstrap_subscriptions().await;

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        // One task per feed.
        {
            let binance = Arc::clone(&self.binance);
            tasks.push(tokio::spawn(async move { binance.run().await }));
        }
        {
            let coinbase = Arc::clone(&self.coinbase);
            tasks.push(tokio::spawn(async move { coinbase.run().await }));
        }
        {
            let kraken = Arc::clone(&self.kraken);
            tasks.push(tokio::spawn(async move { kraken.run().await }));
        }
        if let Some(feed) = &self.kalshi_feed {
            let feed = Arc::clone(feed);
            tasks.push(tokio::spawn(async move { feed.run().await }));
        }

        // Periodic poll loop.
        {
            let pipeline = Arc::clone(&self.pipeline);
            let shutdown = Arc::clone(&self.shutdown);
            let interval = self.settings.discovery.poll_interval_seconds;
            tasks.push(tokio::spawn(async move {
                while shutdown.is_running() {
                    let started = Instant::now();
                    let stats = pipeline.run_once().await;
                    let metrics = stats
                        .iter()
                        .map(|(key, value)| format!("{key}={value}"))
                        .collect::<Vec<_>>()
                        .join(" ");
                    info!(%metrics, "poll_complete");
                    let elapsed = started.elapsed().as_secs();
                    let remaining = interval.saturating_sub(elapsed).max(1);
                    shutdown
                        .interruptible_sleep(Duration::from_secs(remaining))
                        .await;
                }
            }));
        }

        // Realtime BTC loop between polls.
        if self.settings.btc.enabled {
            let pipeline = Arc::clone(&self.pipeline);
            let shutdown = Arc::clone(&self.shutdown);
            tasks.push(tokio::spawn(async move {
                while shutdown.is_running() {
                    shutdown
                        .interruptible_sleep(Duration::from_secs(REALTIME_BTC_INTERVAL_SECS))
                        .await;
                    if !shutdown.is_running() {
                        break;
                    }
                    let _ = pipeline.run_realtime_btc_cycle().await;
                }
            }));
        }

        // Command intake.
        {
            let pipeline = Arc::clone(&self.pipeline);
            let shutdown = Arc::clone(&self.shutdown);
            tasks.push(tokio::spawn(async move {
                while shutdown.is_running() {
                    let notifier = pipeline.notifier();
                    let events = notifier.poll_commands(pipeline.as_ref()).await;
                    if !events.is_empty() {
                        if let Err(e) = pipeline.store().insert_alert_events(&events).await {
                            warn!(error = %e, "command_event_insert_failed");
                        }
                    }
                    shutdown
                        .interruptible_sleep(Duration::from_secs(COMMAND_POLL_INTERVAL_SECS))
                        .await;
                }
            }));
        }

        // Lifecycle drain: auto-subscribe newly discovered markets in the
        // target series.
        if let (Some(feed), Some(lifecycle_rx)) = (&self.kalshi_feed, &self.lifecycle_rx) {
            let feed = Arc::clone(feed);
            let lifecycle_rx = lifecycle_rx.clone();
            let series = self.settings.discovery.target_series_tickers.clone();
            let shutdown = Arc::clone(&self.shutdown);
            tasks.push(tokio::spawn(async move {
                while shutdown.is_running() {
                    while let Ok(event) = lifecycle_rx.try_recv() {
                        let ticker = event.ticker.to_uppercase();
                        if series
                            .iter()
                            .any(|prefix| ticker.starts_with(&prefix.to_uppercase()))
                        {
                            info!(ticker = %ticker, "lifecycle_auto_subscribe");
                            feed.subscribe_market(&ticker);
                        }
                    }
                    shutdown
                        .interruptible_sleep(Duration::from_millis(500))
                        .await;
                }
            }));
        }

        // Health audit: compare WS books against REST for a small sample.
        if let Some(feed) = &self.kalshi_feed {
            let feed = Arc::clone(feed);
            let client = Arc::clone(&self.client);
            let pipeline = Arc::clone(&self.pipeline);
            let shutdown = Arc::clone(&self.shutdown);
            tasks.push(tokio::spawn(async move {
                while shutdown.is_running() {
                    shutdown
                        .interruptible_sleep(Duration::from_secs(HEALTH_AUDIT_INTERVAL_SECS))
                        .await;
                    if !shutdown.is_running() {
                        break;
                    }
                    audit_ws_books(&feed, &client, &pipeline).await;
                }
            }));
        }

        // Supervise until shutdown, logging a status heartbeat.
        let mut status_heartbeat = Heartbeat::new(STATUS_HEARTBEAT_INTERVAL_SECS);
        while self.shutdown.is_running() {
            if status_heartbeat.should_beat() {
                status_heartbeat.beat();
                info!(
                    mode = %self.pipeline.current_mode().as_str(),
                    paused = self.pipeline.is_paused(),
                    auto_trading = self.pipeline.auto_trading(),
                    binance_connected = self.binance.is_connected(),
                    coinbase_connected = self.coinbase.is_connected(),
                    kraken_connected = self.kraken.is_connected(),
                    kalshi_connected = self
                        .kalshi_feed
                        .as_ref()
                        .map(|feed| feed.is_connected())
                        .unwrap_or(false),
                    "runtime_heartbeat"
                );
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        info!("runtime_shutdown_started");
        self.binance.close();
        self.coinbase.close();
        self.kraken.close();
        if let Some(feed) = &self.kalshi_feed {
            feed.close();
        }
        tokio::time::sleep(FEED_CLOSE_GRACE).await;
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        info!("runtime_shutdown_complete");
    }
}

/// Compare WS best bid/ask against a REST spot check and raise an
/// operational alert past the divergence threshold.
async fn audit_ws_books(feed: &KalshiFeed, client: &KalshiClient, pipeline: &DataPipeline) {
    let tickers: Vec<String> = feed
        .subscribed_tickers()
        .into_iter()
        .take(HEALTH_AUDIT_SAMPLE)
        .collect();
    for ticker in tickers {
        let (ws_bid, ws_ask) = feed.best_bid_ask(&ticker);
        if ws_bid.is_none() && ws_ask.is_none() {
            continue;
        }
        let rest_book = match client.get_orderbook(&ticker).await {
            Ok(book) => book,
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "health_audit_rest_failed");
                continue;
            }
        };
        let rest_bid = rest_book.best_yes_bid();
        let rest_ask = rest_book.best_yes_ask();
        let bid_diff = divergence(ws_bid, rest_bid);
        let ask_diff = divergence(ws_ask, rest_ask);
        let worst = bid_diff.max(ask_diff);
        if worst > HEALTH_AUDIT_MAX_DIVERGENCE_CENTS {
            let message = format!(
                "📉 WS/REST divergence on {ticker}: ws_bid={ws_bid:?} rest_bid={rest_bid:?} \
                 ws_ask={ws_ask:?} rest_ask={rest_ask:?} (>{HEALTH_AUDIT_MAX_DIVERGENCE_CENTS}c)"
            );
            warn!(ticker = %ticker, divergence_cents = worst, "ws_health_audit_divergence");
            let notifier = pipeline.notifier();
            let now = Utc::now();
            let mut events = notifier
                .notify_operational_alerts(now, std::slice::from_ref(&message))
                .await;
            if events.is_empty() {
                // Notifier disabled: still record the audit result.
                events.push(AlertEvent {
                    channel: "log".to_string(),
                    event_type: "ws_health_audit".to_string(),
                    market_ticker: Some(ticker.clone()),
                    message,
                    status: "sent".to_string(),
                    metadata: json!({"divergence_cents": worst}),
                    created_at: now,
                });
            }
            if let Err(e) = pipeline.store().insert_alert_events(&events).await {
                warn!(error = %e, "health_audit_event_insert_failed");
            }
        }
    }
}

fn divergence(ws: Option<i64>, rest: Option<i64>) -> i64 {
    match (ws, rest) {
        (Some(ws), Some(rest)) => (ws - rest).abs(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divergence_needs_both_sides() {
        assert_eq!(divergence(Some(45), Some(43)), 2);
        assert_eq!(divergence(Some(45), None), 0);
        assert_eq!(divergence(None, Some(43)), 0);
    }

    #[tokio::test]
    async fn shared_shutdown_wakes_sleeping_tasks() {
        let shutdown = Arc::new(ShutdownManager::new());
        let sleeper = Arc::clone(&shutdown);
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            sleeper.interruptible_sleep(Duration::from_secs(30)).await;
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.shutdown();
        handle.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!shutdown.is_running());
    }
}
