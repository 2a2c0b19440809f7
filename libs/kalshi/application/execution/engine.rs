//! Paper-trading engine: order selection, submission, and the
//! reconciliation loop for resting sandbox orders.

use crate::application::execution::pricing::{best_book_prices, maker_price_for_side};
use crate::application::execution::reconcile::{
    reconcile_transition, OrderEventKind, RepricePolicy,
};
use crate::application::execution::risk::compute_order_size;
use crate::application::signals::BracketArbOpportunity;
use crate::domain::models::{
    Direction, MarketSnapshot, OrderEvent, OrderSide, OrderStatus, PaperOrder, SignalRecord,
    SignalType,
};
use crate::domain::order_lifecycle::{
    extract_order_id, extract_order_status, extract_queue_positions,
};
use crate::infrastructure::config::Settings;
use crate::infrastructure::client::KalshiClient;
use crate::infrastructure::database::{self, MarketStore};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Per-tick execution counters, merged into the pipeline stats
pub type ExecutionStats = BTreeMap<String, i64>;

const FILL_PROBABILITY_PRICE_BAND_CENTS: i64 = 10;
const FILL_PROBABILITY_MIN_SAMPLES: i64 = 20;
const RECONCILE_LOOKBACK_HOURS: i64 = 24;

fn bump(stats: &mut ExecutionStats, key: &str, amount: i64) {
    *stats.entry(key.to_string()).or_insert(0) += amount;
}

fn execution_stats_template() -> ExecutionStats {
    let mut stats = ExecutionStats::new();
    for key in [
        "paper_orders_candidates",
        "paper_orders_attempted",
        "paper_orders_submitted",
        "paper_orders_simulated",
        "paper_orders_failed",
        "paper_orders_skipped",
        "paper_orders_recorded",
    ] {
        stats.insert(key.to_string(), 0);
    }
    stats
}

fn reconcile_stats_template() -> ExecutionStats {
    let mut stats = ExecutionStats::new();
    for key in [
        "paper_order_events_inserted",
        "paper_orders_status_updates",
        "paper_orders_filled",
        "paper_orders_canceled",
        "paper_orders_failed_reconcile",
        "paper_orders_repriced",
        "paper_orders_reprice_recorded",
        "paper_orders_reprice_failed",
        "paper_orders_queue_alerted",
    ] {
        stats.insert(key.to_string(), 0);
    }
    stats
}

/// Sizing, pricing, submission, and reconciliation of paper orders
pub struct PaperTradingEngine {
    settings: Settings,
    client: Arc<KalshiClient>,
    store: Arc<dyn MarketStore>,
    /// Reprice timestamps per market, pruned lazily on access
    reprice_history: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    /// Last observed queue position per order row id
    last_queue_position: Mutex<HashMap<i64, i64>>,
}

impl PaperTradingEngine {
    pub fn new(
        settings: Settings,
        client: Arc<KalshiClient>,
        store: Arc<dyn MarketStore>,
    ) -> Self {
        Self {
            settings,
            client,
            store,
            reprice_history: Mutex::new(HashMap::new()),
            last_queue_position: Mutex::new(HashMap::new()),
        }
    }

    fn reprice_policy(&self) -> RepricePolicy {
        let qm = &self.settings.paper_trading.queue_management;
        RepricePolicy {
            queue_max_depth: qm.max_depth,
            stale_minutes: qm.stale_minutes,
            cooldown_minutes: qm.reprice_cooldown_minutes,
            max_per_window: qm.reprice_max_per_window,
            window_minutes: qm.reprice_window_minutes,
        }
    }

    async fn submit_order(
        &self,
        market_ticker: &str,
        signal_type: SignalType,
        direction: Direction,
        side: OrderSide,
        count: i64,
        price_cents: i64,
        now_utc: DateTime<Utc>,
    ) -> PaperOrder {
        let request_payload = json!({
            "ticker": market_ticker,
            "side": side.as_str(),
            "count": count,
            "price_cents": price_cents,
        });
        let mut response_payload = json!({});
        let mut status = OrderStatus::Simulated;
        let mut reason: Option<String> = None;
        let mut external_order_id: Option<String> = None;

        if self.settings.is_sandbox() {
            match self
                .client
                .place_order(
                    market_ticker,
                    side.as_str(),
                    count,
                    price_cents,
                    &self.settings.paper_trading.base_url,
                )
                .await
            {
                Ok(payload) => {
                    external_order_id = extract_order_id(&payload);
                    response_payload = payload;
                    status = OrderStatus::Submitted;
                }
                Err(e) => {
                    status = OrderStatus::Failed;
                    reason = Some(e.to_string());
                    warn!(
                        ticker = %market_ticker,
                        side = side.as_str(),
                        error = %e,
                        "paper_trade_submit_failed"
                    );
                }
            }
        } else {
            reason = Some("simulation_only".to_string());
        }

        PaperOrder {
            market_ticker: market_ticker.to_string(),
            signal_type,
            direction,
            side,
            count,
            limit_price_cents: price_cents,
            provider: self.settings.paper_trading.mode.clone(),
            status,
            reason,
            external_order_id,
            request_payload,
            response_payload,
            created_at: now_utc,
        }
    }

    fn note_submission(
        order: &PaperOrder,
        stats: &mut ExecutionStats,
        current_exposure_dollars: &mut f64,
    ) {
        match order.status {
            OrderStatus::Submitted => {
                bump(stats, "paper_orders_submitted", 1);
                *current_exposure_dollars +=
                    order.count as f64 * order.limit_price_cents as f64 / 100.0;
            }
            OrderStatus::Simulated => bump(stats, "paper_orders_simulated", 1),
            _ => bump(stats, "paper_orders_failed", 1),
        }
    }

    /// Run one execution pass: arbitrage legs first, then edge-ranked
    /// signal candidates under cooldown and budget gates.
    pub async fn execute(
        &self,
        signals: &[SignalRecord],
        snapshots_by_ticker: &HashMap<String, MarketSnapshot>,
        now_utc: DateTime<Utc>,
        arb_opportunities: &[BracketArbOpportunity],
    ) -> database::Result<(Vec<PaperOrder>, ExecutionStats, Vec<Value>)> {
        let mut stats = execution_stats_template();
        if !self.settings.paper_trading.enabled {
            return Ok((Vec::new(), stats, Vec::new()));
        }
        let pt = &self.settings.paper_trading;

        let mut candidates: Vec<&SignalRecord> = signals
            .iter()
            .filter(|signal| {
                signal.is_actionable()
                    && pt
                        .signal_types
                        .iter()
                        .any(|allowed| allowed == signal.signal_type.as_str())
                    && signal.edge_bps.abs() >= pt.min_edge_bps as f64
                    && signal.confidence >= pt.min_confidence
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.edge_bps
                .abs()
                .partial_cmp(&a.edge_bps.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        bump(&mut stats, "paper_orders_candidates", candidates.len() as i64);

        let open_positions = self.store.get_open_positions_summary().await?;
        let mut current_exposure_dollars: f64 = open_positions
            .iter()
            .map(|position| position.contracts as f64 * position.avg_price_cents / 100.0)
            .sum();

        let mut orders: Vec<PaperOrder> = Vec::new();
        let mut arb_results: Vec<Value> = Vec::new();
        let max_orders = pt.max_orders_per_cycle as i64;
        let cooldown_since = now_utc - Duration::minutes(pt.cooldown_minutes);

        // Arbitrage sets execute first: every leg of an opportunity is
        // submitted together or the set is skipped for budget.
        if pt.enable_arbitrage {
            for opportunity in arb_opportunities {
                let legs = opportunity.legs.len() as i64;
                let attempted = stats["paper_orders_attempted"];
                if attempted + legs > max_orders {
                    break;
                }
                let count = opportunity.max_sets.min(pt.contract_count).max(1);
                let mut leg_orders = Vec::with_capacity(opportunity.legs.len());
                for leg in &opportunity.legs {
                    bump(&mut stats, "paper_orders_attempted", 1);
                    let order = self
                        .submit_order(
                            &leg.ticker,
                            SignalType::Arb,
                            Direction::Arbitrage,
                            leg.side,
                            count,
                            leg.price_cents,
                            now_utc,
                        )
                        .await;
                    Self::note_submission(&order, &mut stats, &mut current_exposure_dollars);
                    leg_orders.push(order);
                }
                let executed = leg_orders
                    .iter()
                    .all(|order| order.status != OrderStatus::Failed);
                arb_results.push(json!({
                    "event_ticker": opportunity.event_ticker,
                    "arb_type": opportunity.arb_type,
                    "executed": executed,
                    "count_per_leg": count,
                    "legs": leg_orders
                        .iter()
                        .map(|order| json!({
                            "ticker": order.market_ticker,
                            "side": order.side.as_str(),
                            "price_cents": order.limit_price_cents,
                            "status": order.status.as_str(),
                        }))
                        .collect::<Vec<_>>(),
                }));
                orders.extend(leg_orders);
            }
        }

        for signal in candidates {
            if stats["paper_orders_attempted"] >= max_orders {
                break;
            }
            let ticker = &signal.market_ticker;
            if self
                .store
                .has_recent_paper_order(ticker, signal.direction, cooldown_since)
                .await?
            {
                bump(&mut stats, "paper_orders_skipped", 1);
                continue;
            }
            let snapshot = match snapshots_by_ticker.get(ticker) {
                Some(snapshot) => snapshot,
                None => {
                    bump(&mut stats, "paper_orders_skipped", 1);
                    continue;
                }
            };
            let side = match signal.direction.side() {
                Some(side) => side,
                None => {
                    bump(&mut stats, "paper_orders_skipped", 1);
                    continue;
                }
            };

            let book = best_book_prices(snapshot);
            let price_cents = match maker_price_for_side(
                side,
                &book,
                pt.maker_only,
                pt.min_price_cents,
                pt.max_price_cents,
            ) {
                Some(price_cents) => price_cents,
                None => {
                    bump(&mut stats, "paper_orders_skipped", 1);
                    continue;
                }
            };

            let series_prefix = ticker.split('-').next().unwrap_or(ticker);
            let fill_probability = self
                .store
                .estimate_fill_probability(
                    series_prefix,
                    pt.fill_lookback_days,
                    price_cents,
                    FILL_PROBABILITY_PRICE_BAND_CENTS,
                    FILL_PROBABILITY_MIN_SAMPLES,
                )
                .await?;

            let count = compute_order_size(
                signal,
                side,
                price_cents,
                pt,
                current_exposure_dollars,
                Some(pt.max_portfolio_exposure_dollars),
                fill_probability,
            );
            if count <= 0 {
                bump(&mut stats, "paper_orders_skipped", 1);
                continue;
            }

            bump(&mut stats, "paper_orders_attempted", 1);
            let order = self
                .submit_order(
                    ticker,
                    signal.signal_type,
                    signal.direction,
                    side,
                    count,
                    price_cents,
                    now_utc,
                )
                .await;
            Self::note_submission(&order, &mut stats, &mut current_exposure_dollars);
            orders.push(order);
        }

        if !orders.is_empty() {
            let ids = self.store.insert_paper_orders(&orders).await?;
            bump(&mut stats, "paper_orders_recorded", ids.len() as i64);
        }
        Ok((orders, stats, arb_results))
    }

    /// Poll open sandbox orders, apply lifecycle transitions, and cancel
    /// and re-quote makers buried in the queue.
    pub async fn reconcile_open_orders(
        &self,
        signals: &[SignalRecord],
        snapshots_by_ticker: &HashMap<String, MarketSnapshot>,
        now_utc: DateTime<Utc>,
        allow_reprice: bool,
    ) -> database::Result<(Vec<PaperOrder>, ExecutionStats)> {
        let mut stats = reconcile_stats_template();
        if !self.settings.is_sandbox()
            || !self.settings.paper_trading.queue_management.enabled
        {
            return Ok((Vec::new(), stats));
        }
        let base_url = self.settings.paper_trading.base_url.clone();
        let since = now_utc - Duration::hours(RECONCILE_LOOKBACK_HOURS);
        let open_orders = self.store.get_open_sandbox_orders(since).await?;
        if open_orders.is_empty() {
            return Ok((Vec::new(), stats));
        }

        let signal_direction_by_ticker: HashMap<&str, Direction> = signals
            .iter()
            .filter(|signal| signal.is_actionable())
            .map(|signal| (signal.market_ticker.as_str(), signal.direction))
            .collect();

        // One queue snapshot serves every order this pass.
        let queue_positions = match self.client.get_queue_positions(&base_url).await {
            Ok(payload) => extract_queue_positions(&payload),
            Err(e) => {
                warn!(error = %e, "queue_refresh_failed");
                for order in &open_orders {
                    let event = OrderEvent {
                        order_id: order.id,
                        ts: now_utc,
                        event_type: "queue_refresh_failed".to_string(),
                        status: OrderStatus::parse(&order.status)
                            .unwrap_or(OrderStatus::Submitted),
                        queue_position: None,
                        details: json!({"error": e.to_string()}),
                    };
                    if self.store.insert_order_event(&event).await.is_ok() {
                        bump(&mut stats, "paper_order_events_inserted", 1);
                    }
                }
                HashMap::new()
            }
        };

        let policy = self.reprice_policy();
        let mut repriced_orders: Vec<PaperOrder> = Vec::new();

        for order in &open_orders {
            let prior = OrderStatus::parse(&order.status).unwrap_or(OrderStatus::Submitted);
            let external_id = match &order.external_order_id {
                Some(external_id) => external_id.clone(),
                None => continue,
            };

            let status_payload = match self
                .client
                .get_order_status(&external_id, &base_url)
                .await
            {
                Ok(payload) => payload,
                Err(e) => {
                    bump(&mut stats, "paper_orders_failed_reconcile", 1);
                    let event = OrderEvent {
                        order_id: order.id,
                        ts: now_utc,
                        event_type: "status_check_failed".to_string(),
                        status: prior,
                        queue_position: None,
                        details: json!({"error": e.to_string()}),
                    };
                    if self.store.insert_order_event(&event).await.is_ok() {
                        bump(&mut stats, "paper_order_events_inserted", 1);
                    }
                    continue;
                }
            };
            let api_status = extract_order_status(&status_payload);
            let queue_position = queue_positions
                .get(&external_id)
                .or_else(|| queue_positions.get(&order.id.to_string()))
                .or_else(|| queue_positions.get(&order.market_ticker))
                .copied();
            let prior_queue = self.last_queue_position.lock().get(&order.id).copied();

            let outcome =
                reconcile_transition(prior, api_status, prior_queue, queue_position);

            if outcome.next != prior {
                self.store
                    .update_order_status(order.id, outcome.next, Some(&status_payload))
                    .await?;
                bump(&mut stats, "paper_orders_status_updates", 1);
                match outcome.next {
                    OrderStatus::Filled => bump(&mut stats, "paper_orders_filled", 1),
                    OrderStatus::Canceled => bump(&mut stats, "paper_orders_canceled", 1),
                    OrderStatus::Failed => {
                        bump(&mut stats, "paper_orders_failed_reconcile", 1)
                    }
                    _ => {}
                }
            }
            for event_kind in &outcome.events {
                let (event_type, status, queue) = match event_kind {
                    OrderEventKind::StatusChanged(status) => {
                        (status.as_str().to_string(), *status, None)
                    }
                    OrderEventKind::Resting { queue_position } => {
                        ("resting".to_string(), outcome.next, *queue_position)
                    }
                };
                let event = OrderEvent {
                    order_id: order.id,
                    ts: now_utc,
                    event_type,
                    status,
                    queue_position: queue,
                    details: json!({}),
                };
                self.store.insert_order_event(&event).await?;
                bump(&mut stats, "paper_order_events_inserted", 1);
            }
            if let Some(queue) = queue_position {
                self.last_queue_position.lock().insert(order.id, queue);
            }
            if outcome.next.is_terminal() {
                self.last_queue_position.lock().remove(&order.id);
                continue;
            }

            // Reprice gate for makers buried deep in the queue.
            let queue = match queue_position {
                Some(queue) => queue,
                None => continue,
            };
            if queue <= policy.queue_max_depth {
                continue;
            }
            let direction = Direction::parse(&order.direction);
            let signal_same_direction = direction
                .map(|direction| {
                    signal_direction_by_ticker.get(order.market_ticker.as_str())
                        == Some(&direction)
                })
                .unwrap_or(false);
            let should_reprice = {
                let mut history = self.reprice_history.lock();
                let entry = history.entry(order.market_ticker.clone()).or_default();
                policy.prune(entry, now_utc);
                policy.should_reprice(
                    queue,
                    order.created_at,
                    now_utc,
                    allow_reprice,
                    signal_same_direction,
                    entry,
                )
            };
            if !should_reprice {
                bump(&mut stats, "paper_orders_queue_alerted", 1);
                continue;
            }

            match self.client.cancel_order(&external_id, &base_url).await {
                Ok(cancel_payload) => {
                    self.store
                        .update_order_status(order.id, OrderStatus::Canceled, Some(&cancel_payload))
                        .await?;
                    let event = OrderEvent {
                        order_id: order.id,
                        ts: now_utc,
                        event_type: "canceled".to_string(),
                        status: OrderStatus::Canceled,
                        queue_position: Some(queue),
                        details: json!({"reason": "reprice"}),
                    };
                    self.store.insert_order_event(&event).await?;
                    bump(&mut stats, "paper_order_events_inserted", 1);
                    bump(&mut stats, "paper_orders_canceled", 1);
                }
                Err(e) => {
                    bump(&mut stats, "paper_orders_reprice_failed", 1);
                    let event = OrderEvent {
                        order_id: order.id,
                        ts: now_utc,
                        event_type: "reprice_failed".to_string(),
                        status: prior,
                        queue_position: Some(queue),
                        details: json!({"error": e.to_string()}),
                    };
                    self.store.insert_order_event(&event).await?;
                    bump(&mut stats, "paper_order_events_inserted", 1);
                    continue;
                }
            }

            let side = match OrderSide::parse(&order.side) {
                Some(side) => side,
                None => continue,
            };
            let new_price = snapshots_by_ticker
                .get(&order.market_ticker)
                .map(best_book_prices)
                .and_then(|book| {
                    maker_price_for_side(
                        side,
                        &book,
                        self.settings.paper_trading.maker_only,
                        self.settings.paper_trading.min_price_cents,
                        self.settings.paper_trading.max_price_cents,
                    )
                });
            let new_price = match new_price {
                Some(new_price) => new_price,
                None => {
                    bump(&mut stats, "paper_orders_reprice_failed", 1);
                    continue;
                }
            };

            let signal_type =
                SignalType::parse(&order.signal_type).unwrap_or(SignalType::Btc);
            let direction = direction.unwrap_or(Direction::BuyYes);
            let replacement = self
                .submit_order(
                    &order.market_ticker,
                    signal_type,
                    direction,
                    side,
                    order.count,
                    new_price,
                    now_utc,
                )
                .await;
            bump(&mut stats, "paper_orders_repriced", 1);
            let reprice_event = OrderEvent {
                order_id: order.id,
                ts: now_utc,
                event_type: "reprice_submitted".to_string(),
                status: replacement.status,
                queue_position: None,
                details: json!({
                    "old_price_cents": order.limit_price_cents,
                    "new_price_cents": new_price,
                }),
            };
            self.store.insert_order_event(&reprice_event).await?;
            bump(&mut stats, "paper_order_events_inserted", 1);
            self.reprice_history
                .lock()
                .entry(order.market_ticker.clone())
                .or_default()
                .push(now_utc);
            repriced_orders.push(replacement);
        }

        if !repriced_orders.is_empty() {
            let ids = self.store.insert_paper_orders(&repriced_orders).await?;
            bump(&mut stats, "paper_orders_reprice_recorded", ids.len() as i64);
            info!(repriced = ids.len(), "reprice_pass_complete");
        }
        Ok((repriced_orders, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::signals::ArbLeg;
    use crate::domain::models::SignalDataSource;
    use crate::infrastructure::database::Database;

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.paper_trading.enabled = true;
        settings.paper_trading.mode = "simulate".to_string();
        settings.paper_trading.min_edge_bps = 300;
        settings.paper_trading.min_confidence = 0.3;
        settings.paper_trading.sizing_mode = "fixed".to_string();
        settings.paper_trading.contract_count = 3;
        settings.paper_trading.max_orders_per_cycle = 6;
        settings
    }

    fn engine(settings: Settings, store: Arc<dyn MarketStore>) -> PaperTradingEngine {
        let client = Arc::new(KalshiClient::new(&settings).unwrap());
        PaperTradingEngine::new(settings, client, store)
    }

    fn actionable_signal(ticker: &str, edge_bps: f64) -> SignalRecord {
        SignalRecord {
            signal_type: SignalType::Weather,
            market_ticker: ticker.to_string(),
            direction: if edge_bps >= 0.0 {
                Direction::BuyYes
            } else {
                Direction::BuyNo
            },
            model_probability: 0.65,
            market_probability: 0.5,
            edge_bps,
            confidence: 0.9,
            data_source: SignalDataSource::Rest,
            vwap_cents: None,
            fillable_qty: None,
            liquidity_sufficient: None,
            details: json!({}),
            created_at: Utc::now(),
        }
    }

    fn snapshot_with_book(ticker: &str) -> MarketSnapshot {
        MarketSnapshot {
            ticker: ticker.to_string(),
            ts: Utc::now(),
            yes_price: Some(0.5),
            no_price: Some(0.5),
            volume: None,
            raw: json!({"yes_bid": 49, "yes_ask": 53, "no_bid": 47, "no_ask": 51}),
        }
    }

    #[tokio::test]
    async fn execute_simulates_and_records_orders() {
        let store: Arc<dyn MarketStore> = Arc::new(Database::in_memory().await.unwrap());
        let engine = engine(test_settings(), Arc::clone(&store));
        let signals = vec![actionable_signal("KXHIGHNY-A", 1500.0)];
        let snapshots =
            HashMap::from([("KXHIGHNY-A".to_string(), snapshot_with_book("KXHIGHNY-A"))]);

        let (orders, stats, arb_results) = engine
            .execute(&signals, &snapshots, Utc::now(), &[])
            .await
            .unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Simulated);
        assert_eq!(orders[0].count, 3);
        // Maker-only with a 4c spread improves the bid by a tick.
        assert_eq!(orders[0].limit_price_cents, 50);
        assert_eq!(stats["paper_orders_candidates"], 1);
        assert_eq!(stats["paper_orders_simulated"], 1);
        assert_eq!(stats["paper_orders_recorded"], 1);
        assert!(arb_results.is_empty());

        // Same (ticker, direction) within the cooldown is skipped.
        let (orders, stats, _) = engine
            .execute(&signals, &snapshots, Utc::now(), &[])
            .await
            .unwrap();
        assert!(orders.is_empty());
        assert_eq!(stats["paper_orders_skipped"], 1);
    }

    #[tokio::test]
    async fn execute_filters_small_edges_and_low_confidence() {
        let store: Arc<dyn MarketStore> = Arc::new(Database::in_memory().await.unwrap());
        let engine = engine(test_settings(), Arc::clone(&store));
        let mut weak_edge = actionable_signal("KXHIGHNY-A", 100.0);
        weak_edge.confidence = 0.9;
        let mut weak_confidence = actionable_signal("KXHIGHNY-B", 900.0);
        weak_confidence.confidence = 0.1;
        let snapshots = HashMap::from([
            ("KXHIGHNY-A".to_string(), snapshot_with_book("KXHIGHNY-A")),
            ("KXHIGHNY-B".to_string(), snapshot_with_book("KXHIGHNY-B")),
        ]);

        let (orders, stats, _) = engine
            .execute(&[weak_edge, weak_confidence], &snapshots, Utc::now(), &[])
            .await
            .unwrap();
        assert!(orders.is_empty());
        assert_eq!(stats["paper_orders_candidates"], 0);
    }

    #[tokio::test]
    async fn arbitrage_legs_submit_first_and_atomically() {
        let store: Arc<dyn MarketStore> = Arc::new(Database::in_memory().await.unwrap());
        let engine = engine(test_settings(), Arc::clone(&store));
        let opportunity = BracketArbOpportunity {
            detected_at: Utc::now(),
            event_ticker: "KXHIGHNY-E".to_string(),
            arb_type: "all_yes".to_string(),
            legs: vec![
                ArbLeg {
                    ticker: "KXHIGHNY-E-B83".to_string(),
                    side: OrderSide::Yes,
                    price_cents: 30,
                    depth: 12,
                },
                ArbLeg {
                    ticker: "KXHIGHNY-E-B85".to_string(),
                    side: OrderSide::Yes,
                    price_cents: 32,
                    depth: 15,
                },
            ],
            cost_cents: 62,
            payout_cents: 100,
            profit_cents: 38,
            max_sets: 12,
            total_profit_cents: 456,
            profit_after_fees_cents: 400,
        };

        let (orders, stats, arb_results) = engine
            .execute(&[], &HashMap::new(), Utc::now(), &[opportunity])
            .await
            .unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders
            .iter()
            .all(|order| order.direction == Direction::Arbitrage));
        assert!(orders
            .iter()
            .all(|order| order.signal_type == SignalType::Arb));
        assert_eq!(orders[0].count, 3, "capped at the configured count");
        assert_eq!(stats["paper_orders_attempted"], 2);
        assert_eq!(arb_results.len(), 1);
        assert_eq!(arb_results[0]["executed"], true);
    }

    #[tokio::test]
    async fn reconcile_is_a_no_op_outside_sandbox() {
        let store: Arc<dyn MarketStore> = Arc::new(Database::in_memory().await.unwrap());
        let engine = engine(test_settings(), Arc::clone(&store));
        let (repriced, stats) = engine
            .reconcile_open_orders(&[], &HashMap::new(), Utc::now(), true)
            .await
            .unwrap();
        assert!(repriced.is_empty());
        assert_eq!(stats["paper_orders_status_updates"], 0);
    }

    #[tokio::test]
    async fn disabled_paper_trading_executes_nothing() {
        let mut settings = test_settings();
        settings.paper_trading.enabled = false;
        let store: Arc<dyn MarketStore> = Arc::new(Database::in_memory().await.unwrap());
        let engine = engine(settings, Arc::clone(&store));
        let (orders, _, _) = engine
            .execute(
                &[actionable_signal("KXHIGHNY-A", 1500.0)],
                &HashMap::new(),
                Utc::now(),
                &[],
            )
            .await
            .unwrap();
        assert!(orders.is_empty());
    }
}
