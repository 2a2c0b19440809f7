//! Per-tick orchestration: collection, signals, execution,
//! reconciliation, and alerting, gated by runtime mode and pause state.

use crate::application::analysis::{
    check_weather_live_gates, generate_accuracy_report, generate_weather_calibration,
    AccuracyReport,
};
use crate::application::collectors::{fetch_btc_spot_ticks, fetch_weather_ensemble_samples};
use crate::application::collectors::resolutions::collect_market_resolutions;
use crate::application::execution::{ExecutionStats, PaperTradingEngine};
use crate::application::price_provider::PriceProvider;
use crate::application::signals::edge_monitor::CurrentSignal;
use crate::application::signals::{
    build_btc_signals, build_edge_decay_alerts, build_weather_probabilities,
    build_weather_signals, scan_bracket_arbitrage, BracketArbOpportunity, SpotQuote, SpotQuotes,
};
use crate::domain::models::{
    AlertEvent, Market, MarketSnapshot, PaperOrder, PriceTier, SignalRecord, SignalType,
};
use crate::domain::orderbook::OrderBookLevels;
use crate::infrastructure::client::KalshiClient;
use crate::infrastructure::config::{BotMode, Settings};
use crate::infrastructure::database::{
    BracketArbRecord, FillMetrics, MarketStore, OpenPosition, PaperOrderRow, SignalRow,
};
use crate::infrastructure::notifier::{BotControl, RuntimeStatus, TelegramNotifier};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Identical operational alerts are suppressed for this long.
const OPERATIONAL_ALERT_COOLDOWN_HOURS: i64 = 6;
/// At most this many operational alerts go out per cycle.
const OPERATIONAL_ALERT_MAX_PER_CYCLE: usize = 3;
/// Dedup-map entries older than this are garbage collected.
const OPERATIONAL_ALERT_GC_DAYS: i64 = 2;

pub type PipelineStats = BTreeMap<String, i64>;

/// The per-tick orchestrator and runtime control surface
pub struct DataPipeline {
    settings: Settings,
    client: Arc<KalshiClient>,
    store: Arc<dyn MarketStore>,
    engine: PaperTradingEngine,
    notifier: Arc<TelegramNotifier>,
    http: reqwest::Client,
    price_provider: Mutex<Option<Arc<PriceProvider>>>,
    last_markets: Mutex<Vec<Market>>,
    did_backfill: AtomicBool,
    paused: AtomicBool,
    auto_trading_enabled: AtomicBool,
    runtime_mode: Mutex<BotMode>,
    pending_live_mode: Mutex<Option<BotMode>>,
    last_poll_at: Mutex<Option<DateTime<Utc>>>,
    last_stats: Mutex<PipelineStats>,
    operational_alert_last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DataPipeline {
    pub fn new(
        settings: Settings,
        client: Arc<KalshiClient>,
        store: Arc<dyn MarketStore>,
        notifier: Arc<TelegramNotifier>,
    ) -> Self {
        let engine = PaperTradingEngine::new(
            settings.clone(),
            Arc::clone(&client),
            Arc::clone(&store),
        );
        let auto_trading = settings.auto_trading_enabled();
        let mode = settings.mode;
        Self {
            settings,
            client,
            store,
            engine,
            notifier,
            http: reqwest::Client::new(),
            price_provider: Mutex::new(None),
            last_markets: Mutex::new(Vec::new()),
            did_backfill: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            auto_trading_enabled: AtomicBool::new(auto_trading),
            runtime_mode: Mutex::new(mode),
            pending_live_mode: Mutex::new(None),
            last_poll_at: Mutex::new(None),
            last_stats: Mutex::new(PipelineStats::new()),
            operational_alert_last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_price_provider(&self, provider: Arc<PriceProvider>) {
        *self.price_provider.lock() = Some(provider);
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> Arc<dyn MarketStore> {
        Arc::clone(&self.store)
    }

    pub fn notifier(&self) -> Arc<TelegramNotifier> {
        Arc::clone(&self.notifier)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn auto_trading(&self) -> bool {
        self.auto_trading_enabled.load(Ordering::Acquire)
    }

    pub fn current_mode(&self) -> BotMode {
        *self.runtime_mode.lock()
    }

    pub fn last_market_tickers(&self) -> Vec<String> {
        self.last_markets
            .lock()
            .iter()
            .map(|market| market.ticker.clone())
            .collect()
    }

    fn trading_allowed(&self) -> bool {
        !self.is_paused() && self.auto_trading()
    }

    // =========================================================================
    // Control surface
    // =========================================================================

    fn apply_mode(&self, mode: BotMode) -> String {
        *self.runtime_mode.lock() = mode;
        let auto = match mode {
            BotMode::Custom => self.settings.paper_trading.enabled,
            BotMode::DemoSafe => true,
            BotMode::LiveSafe => false,
            BotMode::LiveAuto => true,
        };
        self.auto_trading_enabled.store(auto, Ordering::Release);
        format!(
            "Mode changed to {}. auto_trading={}.",
            mode.as_str(),
            if auto { "on" } else { "off" }
        )
    }

    fn handle_mode_request(&self, requested_mode: &str) -> String {
        let mode = match BotMode::parse(requested_mode) {
            Some(mode) => mode,
            None => {
                return "Unsupported mode. Use one of: custom, demo_safe, live_safe, live_auto."
                    .to_string()
            }
        };
        if mode.is_live() {
            *self.pending_live_mode.lock() = Some(mode);
            return "⚠️ Live mode requested. Type `CONFIRM LIVE` to apply. \
                    This will affect auto-trading behavior."
                .to_string();
        }
        *self.pending_live_mode.lock() = None;
        self.apply_mode(mode)
    }

    fn handle_live_confirmation(&self) -> String {
        let pending = self.pending_live_mode.lock().take();
        match pending {
            None => "No pending live mode change.".to_string(),
            Some(mode) => format!("✅ {}", self.apply_mode(mode)),
        }
    }

    async fn fetch_balance_snapshot(&self) -> Option<String> {
        if !self.settings.is_sandbox() {
            return None;
        }
        match self
            .client
            .get_balance(&self.settings.paper_trading.base_url)
            .await
        {
            Ok(payload) => Some(
                payload
                    .as_object()
                    .map(|object| {
                        object
                            .iter()
                            .map(|(key, value)| format!("{key}={value}"))
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_else(|| payload.to_string()),
            ),
            Err(e) => {
                warn!(error = %e, "balance_fetch_failed");
                None
            }
        }
    }

    /// Dedup operational alerts: one per unique message per 6 hours, at
    /// most three per cycle.
    fn filter_operational_alerts(
        &self,
        now_utc: DateTime<Utc>,
        messages: Vec<String>,
    ) -> Vec<String> {
        if messages.is_empty() {
            return Vec::new();
        }
        let cooldown = Duration::hours(OPERATIONAL_ALERT_COOLDOWN_HOURS);
        let mut last_sent = self.operational_alert_last_sent.lock();

        let gc_before = now_utc - Duration::days(OPERATIONAL_ALERT_GC_DAYS);
        last_sent.retain(|_, sent_at| *sent_at >= gc_before);

        let mut seen_this_cycle: HashSet<String> = HashSet::new();
        let mut filtered = Vec::new();
        for message in messages {
            let key = message.trim().to_string();
            if key.is_empty() || seen_this_cycle.contains(&key) {
                continue;
            }
            seen_this_cycle.insert(key.clone());
            if let Some(sent_at) = last_sent.get(&key) {
                if now_utc - *sent_at < cooldown {
                    continue;
                }
            }
            last_sent.insert(key, now_utc);
            filtered.push(message);
            if filtered.len() >= OPERATIONAL_ALERT_MAX_PER_CYCLE {
                break;
            }
        }
        filtered
    }

    // =========================================================================
    // Tick pipeline
    // =========================================================================

    async fn collect_orderbooks(
        &self,
        markets: &[Market],
    ) -> (HashMap<String, OrderBookLevels>, HashMap<String, PriceTier>) {
        let provider = self.price_provider.lock().clone();
        let mut books = HashMap::new();
        let mut tiers = HashMap::new();
        for market in markets {
            let fetched = match &provider {
                Some(provider) => provider.get_kalshi_orderbook(&market.ticker).await,
                None => match self.client.get_orderbook(&market.ticker).await {
                    Ok(book) => Some((book, PriceTier::Rest)),
                    Err(e) => {
                        warn!(ticker = %market.ticker, error = %e, "orderbook_fetch_failed");
                        None
                    }
                },
            };
            if let Some((book, tier)) = fetched {
                if !book.is_empty() {
                    books.insert(market.ticker.clone(), book);
                    tiers.insert(market.ticker.clone(), tier);
                }
            }
        }
        (books, tiers)
    }

    fn scan_arbitrage(
        &self,
        markets: &[Market],
        orderbooks: &HashMap<String, OrderBookLevels>,
        now_utc: DateTime<Utc>,
    ) -> Vec<BracketArbOpportunity> {
        if !self.settings.bracket_arb.enabled {
            return Vec::new();
        }
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for market in markets {
            if !market.in_series("KXHIGHNY") {
                continue;
            }
            grouped
                .entry(market.event_key())
                .or_default()
                .push(market.ticker.clone());
        }
        let mut opportunities = Vec::new();
        for (event_ticker, tickers) in grouped {
            if tickers.len() < 2 {
                continue;
            }
            if tickers
                .iter()
                .any(|ticker| !orderbooks.contains_key(ticker))
            {
                continue;
            }
            if let Some(opportunity) = scan_bracket_arbitrage(
                &event_ticker,
                &tickers,
                orderbooks,
                self.settings.bracket_arb.min_profit_after_fees_cents,
                now_utc,
            ) {
                opportunities.push(opportunity);
            }
        }
        opportunities
            .sort_by_key(|opportunity| std::cmp::Reverse(opportunity.profit_after_fees_cents));
        opportunities
    }

    async fn collect_resolutions(
        &self,
        market_tickers: &[String],
        now_utc: DateTime<Utc>,
    ) -> (i64, i64) {
        let base_override = self
            .settings
            .is_sandbox()
            .then(|| self.settings.paper_trading.base_url.clone());
        let rows = collect_market_resolutions(
            &self.client,
            &self.http,
            market_tickers,
            &self.settings.discovery.target_series_tickers,
            base_override.as_deref(),
            now_utc,
        )
        .await;
        let mut upserted = 0;
        if !rows.is_empty() {
            match self.store.upsert_market_resolutions(&rows).await {
                Ok(count) => upserted = count as i64,
                Err(e) => error!(error = %e, "resolution_upsert_failed"),
            }
        }
        let materialized = match self.store.materialize_prediction_accuracy().await {
            Ok(count) => count as i64,
            Err(e) => {
                error!(error = %e, "prediction_accuracy_materialize_failed");
                0
            }
        };
        (upserted, materialized)
    }

    /// One full poll tick. Never panics the loop; every subsystem error
    /// is logged and zeroed into the stats.
    pub async fn run_once(&self) -> PipelineStats {
        let now = Utc::now();
        let mut stats = PipelineStats::new();

        let markets = match self
            .client
            .list_markets(self.settings.discovery.market_limit)
            .await
        {
            Ok(markets) => markets,
            Err(e) => {
                error!(error = %e, "market_discovery_failed");
                Vec::new()
            }
        };
        *self.last_markets.lock() = markets.clone();
        stats.insert("markets_seen".to_string(), markets.len() as i64);

        if markets.is_empty() {
            warn!("No markets matched current target filters. Check discovery settings.");
            let (upserted, materialized) = self.collect_resolutions(&[], now).await;
            stats.insert("resolutions_upserted".to_string(), upserted);
            stats.insert("prediction_accuracy_materialized".to_string(), materialized);
            *self.last_poll_at.lock() = Some(now);
            *self.last_stats.lock() = stats.clone();
            return stats;
        }
        info!(
            tickers = %markets
                .iter()
                .map(|market| market.ticker.as_str())
                .collect::<Vec<_>>()
                .join(","),
            "target_markets"
        );

        let ticker_to_id = match self.store.upsert_markets(&markets).await {
            Ok(ticker_to_id) => ticker_to_id,
            Err(e) => {
                error!(error = %e, "market_upsert_failed");
                HashMap::new()
            }
        };

        // Current snapshots per market.
        let mut current_snapshots: Vec<MarketSnapshot> = Vec::new();
        let mut snapshot_failures = 0i64;
        for market in &markets {
            match self.client.get_current_snapshot(market).await {
                Ok(snapshot) => current_snapshots.push(snapshot),
                Err(e) => {
                    snapshot_failures += 1;
                    warn!(ticker = %market.ticker, error = %e, "snapshot_fetch_failed");
                }
            }
        }
        let inserted_current = self
            .store
            .insert_snapshots(&current_snapshots, &ticker_to_id)
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "snapshot_insert_failed");
                0
            });
        stats.insert("current_snapshots_inserted".to_string(), inserted_current as i64);
        stats.insert("current_snapshot_failures".to_string(), snapshot_failures);

        // One-shot historical backfill.
        let mut inserted_historical = 0u64;
        if self.settings.discovery.run_historical_backfill_on_start
            && !self.did_backfill.swap(true, Ordering::AcqRel)
        {
            let start = now - Duration::days(self.settings.discovery.historical_days);
            for market in markets
                .iter()
                .take(self.settings.discovery.historical_markets)
            {
                match self.client.get_historical_snapshots(market, start, now).await {
                    Ok(history) => {
                        inserted_historical += self
                            .store
                            .insert_snapshots(&history, &ticker_to_id)
                            .await
                            .unwrap_or(0);
                    }
                    Err(e) => {
                        warn!(ticker = %market.ticker, error = %e, "historical_fetch_failed")
                    }
                }
            }
        }
        stats.insert(
            "historical_snapshots_inserted".to_string(),
            inserted_historical as i64,
        );

        // Collectors.
        let mut weather_samples = Vec::new();
        let mut inserted_weather = 0u64;
        if self.settings.weather.enabled {
            weather_samples =
                fetch_weather_ensemble_samples(&self.settings, &self.http, now).await;
            if !weather_samples.is_empty() {
                inserted_weather = self
                    .store
                    .insert_ensemble_samples(&weather_samples)
                    .await
                    .unwrap_or_else(|e| {
                        error!(error = %e, "weather_insert_failed");
                        0
                    });
            }
        }
        stats.insert("weather_samples_inserted".to_string(), inserted_weather as i64);

        let mut current_ticks = Vec::new();
        let mut inserted_ticks = 0u64;
        if self.settings.btc.enabled {
            current_ticks = fetch_btc_spot_ticks(&self.settings, &self.http, now).await;
            if !current_ticks.is_empty() {
                inserted_ticks = self
                    .store
                    .insert_spot_ticks(&current_ticks)
                    .await
                    .unwrap_or_else(|e| {
                        error!(error = %e, "spot_tick_insert_failed");
                        0
                    });
            }
        }
        stats.insert("crypto_ticks_inserted".to_string(), inserted_ticks as i64);

        // Books, arbitrage, and the signal engine.
        let snapshots_by_ticker: HashMap<String, MarketSnapshot> = current_snapshots
            .iter()
            .map(|snapshot| (snapshot.ticker.clone(), snapshot.clone()))
            .collect();
        let (orderbooks, book_tiers) = self.collect_orderbooks(&markets).await;
        let arb_opportunities = self.scan_arbitrage(&markets, &orderbooks, now);
        stats.insert(
            "arb_opportunities_detected".to_string(),
            arb_opportunities.len() as i64,
        );

        let mut all_signals: Vec<SignalRecord> = Vec::new();
        let mut inserted_bracket_probs = 0u64;
        if !weather_samples.is_empty() {
            let prob_rows = build_weather_probabilities(
                &markets,
                &snapshots_by_ticker,
                &weather_samples,
                now,
            );
            if !prob_rows.is_empty() {
                inserted_bracket_probs = self
                    .store
                    .insert_weather_bracket_probs(&prob_rows)
                    .await
                    .unwrap_or_else(|e| {
                        error!(error = %e, "bracket_prob_insert_failed");
                        0
                    });
            }
            all_signals.extend(build_weather_signals(
                &self.settings,
                &markets,
                &snapshots_by_ticker,
                &weather_samples,
                now,
            ));
        }
        stats.insert(
            "weather_bracket_probs_inserted".to_string(),
            inserted_bracket_probs as i64,
        );

        if self.settings.btc.enabled {
            let lookback_minutes =
                (self.settings.btc.momentum_lookback_minutes + 2).max(20);
            let recent_ticks = self
                .store
                .get_recent_spot_ticks(
                    &self.settings.btc.symbol,
                    now - Duration::minutes(lookback_minutes),
                )
                .await
                .unwrap_or_default();
            let provider = self.price_provider.lock().clone();
            let live_quotes: SpotQuotes = match provider {
                Some(provider) => provider.get_btc_prices().await,
                None => current_ticks
                    .iter()
                    .map(|tick| {
                        (
                            tick.source,
                            SpotQuote {
                                price: tick.price_usd,
                                ts: tick.ts,
                                tier: PriceTier::Rest,
                            },
                        )
                    })
                    .collect(),
            };
            all_signals.extend(build_btc_signals(
                &self.settings,
                &markets,
                &snapshots_by_ticker,
                &recent_ticks,
                &live_quotes,
                &orderbooks,
                &book_tiers,
                now,
            ));
        }
        stats.insert("signals_generated".to_string(), all_signals.len() as i64);
        let inserted_signals = if all_signals.is_empty() {
            0
        } else {
            self.store.insert_signals(&all_signals).await.unwrap_or_else(|e| {
                error!(error = %e, "signal_insert_failed");
                0
            })
        };
        stats.insert("signals_inserted".to_string(), inserted_signals as i64);

        // Resolutions and accuracy run opportunistically each tick.
        let market_tickers: Vec<String> =
            markets.iter().map(|market| market.ticker.clone()).collect();
        let (upserted, materialized) = self.collect_resolutions(&market_tickers, now).await;
        stats.insert("resolutions_upserted".to_string(), upserted);
        stats.insert("prediction_accuracy_materialized".to_string(), materialized);

        // Live gates drop weather signals until calibration clears them.
        let mut executable_signals: Vec<SignalRecord> = all_signals.clone();
        stats.insert("weather_gate_blocked".to_string(), 0);
        if self.current_mode().is_live() {
            let days = self
                .settings
                .weather_live_gate
                .min_resolved_days
                .max(30);
            let report = generate_weather_calibration(self.store.as_ref(), days).await;
            let gates = check_weather_live_gates(&report, &self.settings);
            if !gates.all_pass() {
                executable_signals
                    .retain(|signal| signal.signal_type != SignalType::Weather);
                stats.insert("weather_gate_blocked".to_string(), 1);
                info!(?gates, "weather_live_gate_blocked");
            }
        }

        // Execution and reconciliation.
        let mut paper_orders: Vec<PaperOrder> = Vec::new();
        let mut arb_execution_results = Vec::new();
        if self.trading_allowed() {
            match self
                .engine
                .execute(&executable_signals, &snapshots_by_ticker, now, &arb_opportunities)
                .await
            {
                Ok((orders, execution_stats, arb_results)) => {
                    paper_orders = orders;
                    arb_execution_results = arb_results;
                    merge_stats(&mut stats, &execution_stats);
                }
                Err(e) => error!(error = %e, "paper_trading_failed"),
            }
        } else {
            info!(
                paused = self.is_paused(),
                auto_trading = self.auto_trading(),
                "paper_trading_skipped"
            );
        }

        if self.settings.is_sandbox() {
            match self
                .engine
                .reconcile_open_orders(
                    &all_signals,
                    &snapshots_by_ticker,
                    now,
                    self.trading_allowed(),
                )
                .await
            {
                Ok((repriced, reconcile_stats)) => {
                    paper_orders.extend(repriced);
                    merge_stats(&mut stats, &reconcile_stats);
                }
                Err(e) => error!(error = %e, "reconcile_failed"),
            }
        }

        // Persist detected arbitrage with its execution outcome.
        let mut inserted_arbs = 0usize;
        if !arb_opportunities.is_empty() {
            let result_by_key: HashMap<(String, String), &serde_json::Value> =
                arb_execution_results
                    .iter()
                    .filter_map(|result| {
                        let event = result.get("event_ticker")?.as_str()?.to_string();
                        let arb_type = result.get("arb_type")?.as_str()?.to_string();
                        Some(((event, arb_type), result))
                    })
                    .collect();
            let records: Vec<BracketArbRecord> = arb_opportunities
                .iter()
                .map(|opportunity| {
                    let key = (
                        opportunity.event_ticker.clone(),
                        opportunity.arb_type.clone(),
                    );
                    let result = result_by_key.get(&key);
                    BracketArbRecord {
                        detected_at: opportunity.detected_at,
                        event_ticker: opportunity.event_ticker.clone(),
                        arb_type: opportunity.arb_type.clone(),
                        n_brackets: opportunity.legs.len() as i64,
                        cost_cents: opportunity.cost_cents,
                        payout_cents: opportunity.payout_cents,
                        profit_cents: opportunity.profit_cents,
                        profit_after_fees_cents: opportunity.profit_after_fees_cents,
                        max_sets: opportunity.max_sets,
                        total_profit_cents: opportunity.total_profit_cents,
                        legs: serde_json::to_value(&opportunity.legs)
                            .unwrap_or_else(|_| json!([])),
                        executed: result
                            .and_then(|r| r.get("executed"))
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false),
                        execution_result: result
                            .map(|r| (*r).clone())
                            .unwrap_or_else(|| json!({})),
                    }
                })
                .collect();
            match self.store.insert_bracket_arb_opportunities(&records).await {
                Ok(ids) => inserted_arbs = ids.len(),
                Err(e) => error!(error = %e, "arb_persist_failed"),
            }
        }
        stats.insert("arb_opportunities_inserted".to_string(), inserted_arbs as i64);

        // Alert fan-out.
        let mut alert_events: Vec<AlertEvent> =
            self.notifier.notify(now, &all_signals, &paper_orders).await;
        let open_positions = self
            .store
            .get_open_positions_summary()
            .await
            .unwrap_or_default();
        let current_signal_rows: Vec<CurrentSignal> = all_signals
            .iter()
            .map(|signal| CurrentSignal {
                market_ticker: signal.market_ticker.clone(),
                direction: signal.direction,
                edge_bps: signal.edge_bps,
            })
            .collect();
        let active_tickers: HashSet<String> = market_tickers.iter().cloned().collect();
        let mut operational_messages = build_edge_decay_alerts(
            &open_positions,
            &current_signal_rows,
            self.settings.signals.edge_decay_alert_threshold_bps,
            &active_tickers,
        );
        for opportunity in arb_opportunities.iter().take(3) {
            operational_messages.push(format!(
                "🎯 Bracket arbitrage detected {} {} profit_after_fees={}c max_sets={}",
                opportunity.event_ticker,
                opportunity.arb_type,
                opportunity.profit_after_fees_cents,
                opportunity.max_sets,
            ));
        }
        let operational_messages = self.filter_operational_alerts(now, operational_messages);
        if !operational_messages.is_empty() {
            alert_events.extend(
                self.notifier
                    .notify_operational_alerts(now, &operational_messages)
                    .await,
            );
        }
        let inserted_alerts = if alert_events.is_empty() {
            0
        } else {
            self.store
                .insert_alert_events(&alert_events)
                .await
                .unwrap_or_else(|e| {
                    error!(error = %e, "alert_event_insert_failed");
                    0
                })
        };
        stats.insert("alert_events_inserted".to_string(), inserted_alerts as i64);

        *self.last_poll_at.lock() = Some(now);
        *self.last_stats.lock() = stats.clone();
        stats
    }

    /// Between-polls BTC pass: WS-backed snapshots and live ticks only.
    /// Signal digests are suppressed to keep the notifier quiet.
    pub async fn run_realtime_btc_cycle(&self) -> PipelineStats {
        let now = Utc::now();
        let mut stats = PipelineStats::new();
        let maybe_provider = self.price_provider.lock().clone();
        let provider = match maybe_provider {
            Some(provider) => provider,
            None => return stats,
        };

        let mut markets: Vec<Market> = self
            .last_markets
            .lock()
            .iter()
            .filter(|market| market.in_series("KXBTC15M"))
            .cloned()
            .collect();
        if markets.is_empty() {
            if let Ok(discovered) = self
                .client
                .list_markets(self.settings.discovery.market_limit)
                .await
            {
                *self.last_markets.lock() = discovered.clone();
                markets = discovered
                    .into_iter()
                    .filter(|market| market.in_series("KXBTC15M"))
                    .collect();
            }
        }
        stats.insert("btc_markets_seen".to_string(), markets.len() as i64);
        if markets.is_empty() {
            return stats;
        }

        let ticker_to_id = self.store.upsert_markets(&markets).await.unwrap_or_default();
        let mut snapshots_by_ticker = HashMap::new();
        let mut current_snapshots = Vec::new();
        let mut orderbooks = HashMap::new();
        let mut book_tiers = HashMap::new();
        for market in &markets {
            let snapshot = match provider.get_market_snapshot(&market.ticker).await {
                Some(snapshot) => snapshot,
                None => match self.client.get_current_snapshot(market).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(ticker = %market.ticker, error = %e, "realtime_snapshot_failed");
                        continue;
                    }
                },
            };
            snapshots_by_ticker.insert(market.ticker.clone(), snapshot.clone());
            current_snapshots.push(snapshot);
            if let Some((book, tier)) = provider.get_kalshi_orderbook(&market.ticker).await {
                if !book.is_empty() {
                    orderbooks.insert(market.ticker.clone(), book);
                    book_tiers.insert(market.ticker.clone(), tier);
                }
            }
        }
        let inserted_snapshots = self
            .store
            .insert_snapshots(&current_snapshots, &ticker_to_id)
            .await
            .unwrap_or(0);
        stats.insert("btc_snapshots_inserted".to_string(), inserted_snapshots as i64);

        let live_quotes = provider.get_btc_prices().await;
        let current_ticks: Vec<crate::domain::models::SpotTick> = live_quotes
            .iter()
            .map(|(source, quote)| crate::domain::models::SpotTick {
                ts: quote.ts,
                source: *source,
                symbol: self.settings.btc.symbol.clone(),
                price_usd: quote.price,
                raw: json!({"data_source": quote.tier.as_str(), "mode": "realtime"}),
            })
            .collect();
        let inserted_ticks = if current_ticks.is_empty() {
            0
        } else {
            self.store.insert_spot_ticks(&current_ticks).await.unwrap_or(0)
        };
        stats.insert("btc_ticks_inserted".to_string(), inserted_ticks as i64);

        let lookback_minutes = (self.settings.btc.momentum_lookback_minutes + 2).max(20);
        let recent_ticks = self
            .store
            .get_recent_spot_ticks(
                &self.settings.btc.symbol,
                now - Duration::minutes(lookback_minutes),
            )
            .await
            .unwrap_or_default();
        let btc_signals = build_btc_signals(
            &self.settings,
            &markets,
            &snapshots_by_ticker,
            &recent_ticks,
            &live_quotes,
            &orderbooks,
            &book_tiers,
            now,
        );
        stats.insert("btc_signals_generated".to_string(), btc_signals.len() as i64);
        let inserted_signals = if btc_signals.is_empty() {
            0
        } else {
            self.store.insert_signals(&btc_signals).await.unwrap_or(0)
        };
        stats.insert("btc_signals_inserted".to_string(), inserted_signals as i64);

        let mut order_count = 0i64;
        let mut alert_count = 0i64;
        if self.trading_allowed() && !btc_signals.is_empty() {
            if let Ok((orders, _stats, _arbs)) = self
                .engine
                .execute(&btc_signals, &snapshots_by_ticker, now, &[])
                .await
            {
                order_count = orders.len() as i64;
                if !orders.is_empty() {
                    let events = self.notifier.notify(now, &[], &orders).await;
                    if !events.is_empty() {
                        alert_count = self
                            .store
                            .insert_alert_events(&events)
                            .await
                            .unwrap_or(0) as i64;
                    }
                }
            }
        }
        stats.insert("btc_realtime_orders".to_string(), order_count);
        stats.insert("btc_realtime_order_alert_events".to_string(), alert_count);
        stats
    }
}

fn merge_stats(into: &mut PipelineStats, from: &ExecutionStats) {
    for (key, value) in from {
        *into.entry(key.clone()).or_insert(0) += value;
    }
}

// =============================================================================
// Control surface for the notifier
// =============================================================================

#[async_trait]
impl BotControl for DataPipeline {
    fn runtime_status(&self) -> RuntimeStatus {
        let last_metrics = self
            .last_stats
            .lock()
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        RuntimeStatus {
            mode: self.current_mode().as_str().to_string(),
            paused: self.is_paused(),
            last_poll_at: *self.last_poll_at.lock(),
            last_metrics,
        }
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    fn mode_name(&self) -> String {
        self.current_mode().as_str().to_string()
    }

    fn request_mode_change(&self, requested_mode: &str) -> String {
        self.handle_mode_request(requested_mode)
    }

    fn confirm_live_mode(&self) -> String {
        self.handle_live_confirmation()
    }

    async fn open_positions(&self) -> Vec<OpenPosition> {
        self.store.get_open_positions_summary().await.unwrap_or_default()
    }

    async fn recent_orders(&self, limit: i64) -> Vec<PaperOrderRow> {
        self.store.get_recent_paper_orders(limit).await.unwrap_or_default()
    }

    async fn recent_signals(&self, limit: i64) -> Vec<SignalRow> {
        self.store.get_recent_signals(limit).await.unwrap_or_default()
    }

    async fn accuracy_report(&self, days: i64) -> AccuracyReport {
        generate_accuracy_report(self.store.as_ref(), "all", days).await
    }

    async fn fill_metrics(&self, days: i64) -> FillMetrics {
        self.store.get_paper_fill_metrics(days).await.unwrap_or_default()
    }

    async fn balance_snapshot(&self) -> Option<String> {
        self.fetch_balance_snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::Database;

    fn stub_settings() -> Settings {
        let mut settings = Settings::default();
        settings.kalshi.stub_mode = true;
        settings.weather.enabled = false;
        settings.btc.enabled = false;
        settings.discovery.run_historical_backfill_on_start = false;
        settings.paper_trading.enabled = true;
        settings.paper_trading.mode = "simulate".to_string();
        settings
    }

    async fn pipeline_with(settings: Settings) -> DataPipeline {
        let client = Arc::new(KalshiClient::new(&settings).unwrap());
        let store: Arc<dyn MarketStore> = Arc::new(Database::in_memory().await.unwrap());
        let notifier = Arc::new(TelegramNotifier::new(settings.clone()));
        DataPipeline::new(settings, client, store, notifier)
    }

    #[tokio::test]
    async fn run_once_in_stub_mode_populates_stats() {
        let pipeline = pipeline_with(stub_settings()).await;
        let stats = pipeline.run_once().await;
        assert!(stats["markets_seen"] > 0);
        assert!(stats["current_snapshots_inserted"] > 0);
        assert_eq!(stats["current_snapshot_failures"], 0);
        assert!(stats.contains_key("alert_events_inserted"));
        assert!(pipeline.runtime_status().last_poll_at.is_some());

        // Same tick replayed: snapshot inserts are idempotent within the
        // seeded minute.
        let again = pipeline.run_once().await;
        assert_eq!(again["current_snapshots_inserted"], 0);
    }

    #[tokio::test]
    async fn pause_blocks_execution() {
        let pipeline = pipeline_with(stub_settings()).await;
        pipeline.set_paused(true);
        let stats = pipeline.run_once().await;
        assert!(!stats.contains_key("paper_orders_attempted"));
        pipeline.set_paused(false);
        let stats = pipeline.run_once().await;
        assert!(stats.contains_key("paper_orders_attempted"));
    }

    #[tokio::test]
    async fn live_mode_requires_confirmation() {
        let pipeline = pipeline_with(stub_settings()).await;
        assert_eq!(pipeline.current_mode(), BotMode::DemoSafe);

        let reply = pipeline.request_mode_change("live_auto");
        assert!(reply.contains("CONFIRM LIVE"));
        assert_eq!(pipeline.current_mode(), BotMode::DemoSafe);

        let reply = pipeline.confirm_live_mode();
        assert!(reply.contains("live_auto"));
        assert_eq!(pipeline.current_mode(), BotMode::LiveAuto);
        assert!(pipeline.auto_trading());

        // live_safe disables auto trading on confirmation.
        pipeline.request_mode_change("live_safe");
        pipeline.confirm_live_mode();
        assert_eq!(pipeline.current_mode(), BotMode::LiveSafe);
        assert!(!pipeline.auto_trading());

        assert_eq!(
            pipeline.confirm_live_mode(),
            "No pending live mode change."
        );
        assert!(pipeline
            .request_mode_change("warp_speed")
            .contains("Unsupported mode"));
    }

    #[tokio::test]
    async fn operational_alerts_dedupe_with_cooldown_and_cap() {
        let pipeline = pipeline_with(stub_settings()).await;
        let now = Utc::now();
        let messages: Vec<String> = (0..5).map(|i| format!("alert {i}")).collect();
        let first = pipeline.filter_operational_alerts(now, messages.clone());
        assert_eq!(first.len(), OPERATIONAL_ALERT_MAX_PER_CYCLE);

        // Within the cooldown the same messages are suppressed; the ones
        // that missed the cap last cycle go out now.
        let second = pipeline.filter_operational_alerts(now, messages.clone());
        assert_eq!(second.len(), 2);
        let third = pipeline.filter_operational_alerts(now, messages);
        assert!(third.is_empty());

        // After the cooldown they fire again.
        let later = now + Duration::hours(OPERATIONAL_ALERT_COOLDOWN_HOURS + 1);
        let fourth =
            pipeline.filter_operational_alerts(later, vec!["alert 0".to_string()]);
        assert_eq!(fourth.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_messages_within_cycle_collapse() {
        let pipeline = pipeline_with(stub_settings()).await;
        let now = Utc::now();
        let filtered = pipeline.filter_operational_alerts(
            now,
            vec!["same".to_string(), "same".to_string(), " same ".to_string()],
        );
        assert_eq!(filtered.len(), 1);
    }
}
