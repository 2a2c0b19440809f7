//! Persistent store: the `MarketStore` contract, its SQLite
//! implementation, and the no-op store used by orchestrator tests.
//!
//! Every write is idempotent on the entity's natural key; callers may
//! replay a whole tick without duplicating rows.

pub mod models;
pub mod schema;

use crate::domain::models::{
    AlertEvent, Direction, Market, MarketResolution, MarketSnapshot, OrderEvent, OrderStatus,
    PaperOrder, SignalRecord, SignalType, SpotSource, SpotTick, WeatherBracketProb,
    WeatherEnsembleSample,
};
use crate::domain::scoring::{
    brier_score, calibration_table, log_loss, pearson_correlation, CalibrationBucket,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

pub use models::{
    AccuracyMetrics, BracketArbRecord, FillMetrics, OpenPosition, PaperOrderRow, SignalRow,
    SpotTickRow, WeatherBacktestRow,
};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Schema error: {0}")]
    SchemaError(#[from] schema::SchemaError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

// =============================================================================
// Contract
// =============================================================================

/// Store contract the pipeline depends on.
///
/// Tests inject [`NullStore`]; production uses [`Database`].
#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn upsert_markets(&self, markets: &[Market]) -> Result<HashMap<String, i64>>;
    async fn insert_snapshots(
        &self,
        snapshots: &[MarketSnapshot],
        ticker_to_id: &HashMap<String, i64>,
    ) -> Result<u64>;
    async fn insert_spot_ticks(&self, ticks: &[SpotTick]) -> Result<u64>;
    async fn insert_ensemble_samples(&self, samples: &[WeatherEnsembleSample]) -> Result<u64>;
    async fn insert_weather_bracket_probs(&self, rows: &[WeatherBracketProb]) -> Result<u64>;
    async fn insert_signals(&self, signals: &[SignalRecord]) -> Result<u64>;

    /// Insert orders and their initial lifecycle event; returns row ids in
    /// input order.
    async fn insert_paper_orders(&self, orders: &[PaperOrder]) -> Result<Vec<i64>>;
    async fn insert_order_event(&self, event: &OrderEvent) -> Result<()>;
    async fn update_order_status(
        &self,
        order_id: i64,
        status: OrderStatus,
        response: Option<&Value>,
    ) -> Result<()>;
    async fn has_recent_paper_order(
        &self,
        ticker: &str,
        direction: Direction,
        since: DateTime<Utc>,
    ) -> Result<bool>;
    async fn get_open_positions_summary(&self) -> Result<Vec<OpenPosition>>;
    async fn get_recent_signals(&self, limit: i64) -> Result<Vec<SignalRow>>;
    async fn get_recent_paper_orders(&self, limit: i64) -> Result<Vec<PaperOrderRow>>;
    async fn get_open_sandbox_orders(&self, since: DateTime<Utc>) -> Result<Vec<PaperOrderRow>>;

    async fn get_latest_spot_tick(
        &self,
        source: SpotSource,
        symbol: &str,
    ) -> Result<Option<SpotTickRow>>;
    async fn get_recent_spot_ticks(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SpotTick>>;

    async fn upsert_market_resolutions(&self, rows: &[MarketResolution]) -> Result<u64>;
    /// Join resolved markets onto actionable signals, scoring per-contract
    /// pnl from the market price at emission. Idempotent per signal.
    async fn materialize_prediction_accuracy(&self) -> Result<u64>;
    async fn get_accuracy_metrics(
        &self,
        days: i64,
        signal_type: Option<SignalType>,
    ) -> Result<AccuracyMetrics>;
    async fn get_calibration_curve(
        &self,
        days: i64,
        signal_type: Option<SignalType>,
    ) -> Result<Vec<CalibrationBucket>>;
    async fn get_weather_backtest_rows(&self, days: i64) -> Result<Vec<WeatherBacktestRow>>;
    async fn get_paper_fill_metrics(&self, days: i64) -> Result<FillMetrics>;

    /// Empirical fill probability for a series near a price: the share of
    /// closed orders within ±`price_band_cents` that (partially) filled.
    /// `None` when fewer than `min_samples` orders qualify.
    async fn estimate_fill_probability(
        &self,
        ticker_prefix: &str,
        lookback_days: i64,
        price_cents: i64,
        price_band_cents: i64,
        min_samples: i64,
    ) -> Result<Option<f64>>;

    async fn insert_bracket_arb_opportunities(
        &self,
        rows: &[BracketArbRecord],
    ) -> Result<Vec<i64>>;
    async fn insert_alert_events(&self, events: &[AlertEvent]) -> Result<u64>;
}

// =============================================================================
// SQLite implementation
// =============================================================================

/// SQLite-backed store
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect and initialize the schema. Connection failure here is fatal
    /// to startup by design; callers surface the error and exit.
    pub async fn new(db_url: &str) -> Result<Self> {
        info!("Connecting to database: {}", db_url);
        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePool::connect_with(options).await?;
        schema::initialize_schema(&pool).await?;
        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn accuracy_rows(
        &self,
        days: i64,
        signal_type: Option<SignalType>,
    ) -> Result<Vec<(f64, f64, f64, i64, f64)>> {
        let cutoff = Utc::now() - Duration::days(days.max(1));
        let base = "SELECT model_probability, market_probability, edge_bps, outcome, \
                    pnl_per_contract_cents FROM prediction_accuracy WHERE created_at >= ?";
        let rows = match signal_type {
            Some(signal_type) => {
                sqlx::query(&format!("{base} AND signal_type = ?"))
                    .bind(cutoff)
                    .bind(signal_type.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query(base).bind(cutoff).fetch_all(&self.pool).await?,
        };
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get::<f64, _>(0),
                    row.get::<f64, _>(1),
                    row.get::<f64, _>(2),
                    row.get::<i64, _>(3),
                    row.get::<f64, _>(4),
                )
            })
            .collect())
    }
}

#[async_trait]
impl MarketStore for Database {
    async fn upsert_markets(&self, markets: &[Market]) -> Result<HashMap<String, i64>> {
        let now = Utc::now();
        let mut ticker_to_id = HashMap::with_capacity(markets.len());
        for market in markets {
            let row = sqlx::query(
                r#"
                INSERT INTO markets (ticker, title, status, close_time, raw_json, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (ticker) DO UPDATE SET
                    title = excluded.title,
                    status = excluded.status,
                    close_time = excluded.close_time,
                    raw_json = excluded.raw_json,
                    updated_at = excluded.updated_at
                RETURNING id
                "#,
            )
            .bind(&market.ticker)
            .bind(&market.title)
            .bind(&market.status)
            .bind(market.close_time)
            .bind(market.raw.to_string())
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            ticker_to_id.insert(market.ticker.clone(), row.get::<i64, _>(0));
        }
        Ok(ticker_to_id)
    }

    async fn insert_snapshots(
        &self,
        snapshots: &[MarketSnapshot],
        ticker_to_id: &HashMap<String, i64>,
    ) -> Result<u64> {
        let mut inserted = 0;
        for snapshot in snapshots {
            let market_id = match ticker_to_id.get(&snapshot.ticker) {
                Some(id) => *id,
                None => continue,
            };
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO market_snapshots
                    (market_id, snapshot_ts, yes_price, no_price, volume, raw_json)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(market_id)
            .bind(snapshot.ts)
            .bind(snapshot.yes_price)
            .bind(snapshot.no_price)
            .bind(snapshot.volume)
            .bind(snapshot.raw.to_string())
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_spot_ticks(&self, ticks: &[SpotTick]) -> Result<u64> {
        let mut inserted = 0;
        for tick in ticks {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO crypto_spot_ticks (ts, source, symbol, price_usd, raw_json)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(tick.ts)
            .bind(tick.source.as_str())
            .bind(&tick.symbol)
            .bind(tick.price_usd)
            .bind(tick.raw.to_string())
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_ensemble_samples(&self, samples: &[WeatherEnsembleSample]) -> Result<u64> {
        let mut inserted = 0;
        for sample in samples {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO weather_ensemble_samples
                    (collected_at, target_date, model, member, max_temp_f, source)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(sample.collected_at)
            .bind(sample.target_date)
            .bind(&sample.model)
            .bind(&sample.member)
            .bind(sample.max_temp_f)
            .bind(&sample.source)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_weather_bracket_probs(&self, rows: &[WeatherBracketProb]) -> Result<u64> {
        let mut inserted = 0;
        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO weather_bracket_probabilities
                    (collected_at, target_date, ticker, lower_bound, upper_bound,
                     model_prob, market_prob, sample_count)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.collected_at)
            .bind(row.target_date)
            .bind(&row.ticker)
            .bind(row.lower_bound)
            .bind(row.upper_bound)
            .bind(row.model_prob)
            .bind(row.market_prob)
            .bind(row.sample_count)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_signals(&self, signals: &[SignalRecord]) -> Result<u64> {
        let mut inserted = 0;
        for signal in signals {
            let result = sqlx::query(
                r#"
                INSERT INTO signals
                    (created_at, signal_type, market_ticker, direction, model_probability,
                     market_probability, edge_bps, confidence, data_source, vwap_cents,
                     fillable_qty, liquidity_sufficient, details)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(signal.created_at)
            .bind(signal.signal_type.as_str())
            .bind(&signal.market_ticker)
            .bind(signal.direction.as_str())
            .bind(signal.model_probability)
            .bind(signal.market_probability)
            .bind(signal.edge_bps)
            .bind(signal.confidence)
            .bind(signal.data_source.as_str())
            .bind(signal.vwap_cents)
            .bind(signal.fillable_qty)
            .bind(signal.liquidity_sufficient)
            .bind(signal.details.to_string())
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_paper_orders(&self, orders: &[PaperOrder]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(orders.len());
        for order in orders {
            let result = sqlx::query(
                r#"
                INSERT INTO paper_trade_orders
                    (market_ticker, signal_type, direction, side, count, limit_price_cents,
                     provider, status, reason, external_order_id, request_payload,
                     response_payload, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&order.market_ticker)
            .bind(order.signal_type.as_str())
            .bind(order.direction.as_str())
            .bind(order.side.as_str())
            .bind(order.count)
            .bind(order.limit_price_cents)
            .bind(&order.provider)
            .bind(order.status.as_str())
            .bind(&order.reason)
            .bind(&order.external_order_id)
            .bind(order.request_payload.to_string())
            .bind(order.response_payload.to_string())
            .bind(order.created_at)
            .bind(order.created_at)
            .execute(&self.pool)
            .await?;
            let order_id = result.last_insert_rowid();
            self.insert_order_event(&OrderEvent {
                order_id,
                ts: order.created_at,
                event_type: "created".to_string(),
                status: order.status,
                queue_position: None,
                details: serde_json::json!({"reason": order.reason}),
            })
            .await?;
            ids.push(order_id);
        }
        debug!("Inserted {} paper orders", ids.len());
        Ok(ids)
    }

    async fn insert_order_event(&self, event: &OrderEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO paper_trade_order_events
                (order_id, ts, event_type, status, queue_position, details)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.order_id)
        .bind(event.ts)
        .bind(&event.event_type)
        .bind(event.status.as_str())
        .bind(event.queue_position)
        .bind(event.details.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_order_status(
        &self,
        order_id: i64,
        status: OrderStatus,
        response: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE paper_trade_orders
            SET status = ?,
                response_payload = COALESCE(?, response_payload),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(response.map(|v| v.to_string()))
        .bind(Utc::now())
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_recent_paper_order(
        &self,
        ticker: &str,
        direction: Direction,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM paper_trade_orders
            WHERE market_ticker = ? AND direction = ? AND created_at >= ?
            "#,
        )
        .bind(ticker)
        .bind(direction.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn get_open_positions_summary(&self) -> Result<Vec<OpenPosition>> {
        let positions = sqlx::query_as::<_, OpenPosition>(
            r#"
            SELECT market_ticker,
                   side,
                   SUM(count) AS contracts,
                   AVG(CAST(limit_price_cents AS REAL)) AS avg_price_cents
            FROM paper_trade_orders
            WHERE status IN ('submitted', 'partially_filled')
            GROUP BY market_ticker, side
            ORDER BY market_ticker, side
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(positions)
    }

    async fn get_recent_signals(&self, limit: i64) -> Result<Vec<SignalRow>> {
        let rows = sqlx::query_as::<_, SignalRow>(
            r#"
            SELECT id, created_at, signal_type, market_ticker, direction,
                   model_probability, market_probability, edge_bps, confidence
            FROM signals
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_recent_paper_orders(&self, limit: i64) -> Result<Vec<PaperOrderRow>> {
        let rows = sqlx::query_as::<_, PaperOrderRow>(
            r#"
            SELECT id, market_ticker, signal_type, direction, side, count,
                   limit_price_cents, provider, status, reason, external_order_id, created_at
            FROM paper_trade_orders
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_open_sandbox_orders(&self, since: DateTime<Utc>) -> Result<Vec<PaperOrderRow>> {
        let rows = sqlx::query_as::<_, PaperOrderRow>(
            r#"
            SELECT id, market_ticker, signal_type, direction, side, count,
                   limit_price_cents, provider, status, reason, external_order_id, created_at
            FROM paper_trade_orders
            WHERE provider = 'kalshi_demo'
              AND status IN ('submitted', 'partially_filled')
              AND created_at >= ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_latest_spot_tick(
        &self,
        source: SpotSource,
        symbol: &str,
    ) -> Result<Option<SpotTickRow>> {
        let row = sqlx::query_as::<_, SpotTickRow>(
            r#"
            SELECT ts, source, symbol, price_usd
            FROM crypto_spot_ticks
            WHERE source = ? AND symbol = ?
            ORDER BY ts DESC
            LIMIT 1
            "#,
        )
        .bind(source.as_str())
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_recent_spot_ticks(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SpotTick>> {
        let rows = sqlx::query_as::<_, SpotTickRow>(
            r#"
            SELECT ts, source, symbol, price_usd
            FROM crypto_spot_ticks
            WHERE symbol = ? AND ts >= ?
            ORDER BY ts ASC
            "#,
        )
        .bind(symbol)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(SpotTick {
                    ts: row.ts,
                    source: SpotSource::parse(&row.source)?,
                    symbol: row.symbol,
                    price_usd: row.price_usd,
                    raw: Value::Null,
                })
            })
            .collect())
    }

    async fn upsert_market_resolutions(&self, rows: &[MarketResolution]) -> Result<u64> {
        let mut upserted = 0;
        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO market_resolutions
                    (ticker, series_ticker, event_ticker, market_type, resolved_at,
                     result, actual_value, resolution_source, collected_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (ticker) DO UPDATE SET
                    series_ticker = excluded.series_ticker,
                    event_ticker = excluded.event_ticker,
                    market_type = excluded.market_type,
                    resolved_at = excluded.resolved_at,
                    result = excluded.result,
                    actual_value = excluded.actual_value,
                    resolution_source = excluded.resolution_source,
                    collected_at = excluded.collected_at
                "#,
            )
            .bind(&row.ticker)
            .bind(&row.series_ticker)
            .bind(&row.event_ticker)
            .bind(&row.market_type)
            .bind(row.resolved_at)
            .bind(&row.result)
            .bind(row.actual_value)
            .bind(&row.resolution_source)
            .bind(row.collected_at)
            .execute(&self.pool)
            .await?;
            upserted += result.rows_affected();
        }
        Ok(upserted)
    }

    async fn materialize_prediction_accuracy(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO prediction_accuracy
                (signal_id, market_ticker, signal_type, direction, model_probability,
                 market_probability, edge_bps, result, outcome, pnl_per_contract_cents,
                 resolved_at, created_at)
            SELECT s.id, s.market_ticker, s.signal_type, s.direction, s.model_probability,
                   s.market_probability, s.edge_bps, r.result,
                   CASE WHEN r.result = 'yes' THEN 1 ELSE 0 END,
                   CASE
                       WHEN s.direction = 'buy_yes' AND r.result = 'yes'
                           THEN 100.0 - (s.market_probability * 100.0)
                       WHEN s.direction = 'buy_yes'
                           THEN -(s.market_probability * 100.0)
                       WHEN s.direction = 'buy_no' AND r.result = 'no'
                           THEN s.market_probability * 100.0
                       ELSE -(100.0 - (s.market_probability * 100.0))
                   END,
                   r.resolved_at, s.created_at
            FROM signals s
            JOIN market_resolutions r ON r.ticker = s.market_ticker
            WHERE r.result IN ('yes', 'no')
              AND s.direction IN ('buy_yes', 'buy_no')
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_accuracy_metrics(
        &self,
        days: i64,
        signal_type: Option<SignalType>,
    ) -> Result<AccuracyMetrics> {
        let rows = self.accuracy_rows(days, signal_type).await?;
        if rows.is_empty() {
            return Ok(AccuracyMetrics::default());
        }
        let model: Vec<(f64, i64)> = rows.iter().map(|r| (r.0, r.3)).collect();
        let market: Vec<(f64, i64)> = rows.iter().map(|r| (r.1, r.3)).collect();
        let edge_pnl: Vec<(f64, f64)> = rows.iter().map(|r| (r.2, r.4)).collect();
        let wins = rows.iter().filter(|r| r.4 > 0.0).count() as f64;
        let total_pnl: f64 = rows.iter().map(|r| r.4).sum();
        let n = rows.len() as f64;
        Ok(AccuracyMetrics {
            n_signals: rows.len() as i64,
            brier_score: brier_score(&model),
            market_brier_score: brier_score(&market),
            log_loss: log_loss(&model),
            edge_reliability: pearson_correlation(&edge_pnl),
            hit_rate: Some(wins / n),
            avg_pnl_per_contract: Some(total_pnl / n),
            total_pnl: Some(total_pnl),
        })
    }

    async fn get_calibration_curve(
        &self,
        days: i64,
        signal_type: Option<SignalType>,
    ) -> Result<Vec<CalibrationBucket>> {
        let rows = self.accuracy_rows(days, signal_type).await?;
        let predictions: Vec<(f64, i64)> = rows.iter().map(|r| (r.0, r.3)).collect();
        let (table, _max_error) = calibration_table(&predictions, 10);
        Ok(table)
    }

    async fn get_weather_backtest_rows(&self, days: i64) -> Result<Vec<WeatherBacktestRow>> {
        let cutoff: NaiveDate = (Utc::now() - Duration::days(days.max(1))).date_naive();
        let rows = sqlx::query_as::<_, WeatherBacktestRow>(
            r#"
            SELECT wbp.target_date, wbp.ticker, wbp.model_prob, wbp.market_prob, r.result
            FROM weather_bracket_probabilities wbp
            JOIN market_resolutions r ON r.ticker = wbp.ticker
            WHERE r.result IN ('yes', 'no')
              AND wbp.target_date >= ?
              AND wbp.collected_at = (
                  SELECT MAX(w2.collected_at)
                  FROM weather_bracket_probabilities w2
                  WHERE w2.ticker = wbp.ticker AND w2.target_date = wbp.target_date)
            ORDER BY wbp.target_date, wbp.ticker
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_paper_fill_metrics(&self, days: i64) -> Result<FillMetrics> {
        let cutoff = Utc::now() - Duration::days(days.max(1));
        let counts = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n
            FROM paper_trade_orders
            WHERE created_at >= ?
            GROUP BY status
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        let mut metrics = FillMetrics::default();
        for row in counts {
            let status: String = row.get(0);
            let n: i64 = row.get(1);
            metrics.total_orders += n;
            match status.as_str() {
                "filled" | "partially_filled" => metrics.filled_orders += n,
                "submitted" => metrics.open_orders += n,
                "canceled" => metrics.canceled_orders += n,
                "failed" => metrics.failed_orders += n,
                _ => {}
            }
        }
        if metrics.total_orders > 0 {
            metrics.fill_rate =
                Some(metrics.filled_orders as f64 / metrics.total_orders as f64);
        }

        let fills = sqlx::query(
            r#"
            SELECT o.created_at, MIN(e.ts) AS filled_at
            FROM paper_trade_orders o
            JOIN paper_trade_order_events e
              ON e.order_id = o.id AND e.status = 'filled'
            WHERE o.created_at >= ?
            GROUP BY o.id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        if !fills.is_empty() {
            let total_minutes: f64 = fills
                .iter()
                .map(|row| {
                    let created: DateTime<Utc> = row.get(0);
                    let filled: DateTime<Utc> = row.get(1);
                    (filled - created).num_seconds().max(0) as f64 / 60.0
                })
                .sum();
            metrics.avg_fill_minutes = Some(total_minutes / fills.len() as f64);
        }
        Ok(metrics)
    }

    async fn estimate_fill_probability(
        &self,
        ticker_prefix: &str,
        lookback_days: i64,
        price_cents: i64,
        price_band_cents: i64,
        min_samples: i64,
    ) -> Result<Option<f64>> {
        let cutoff = Utc::now() - Duration::days(lookback_days.max(1));
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n
            FROM paper_trade_orders
            WHERE market_ticker LIKE ?
              AND created_at >= ?
              AND limit_price_cents BETWEEN ? AND ?
              AND status IN ('filled', 'partially_filled', 'canceled', 'failed')
            GROUP BY status
            "#,
        )
        .bind(format!("{ticker_prefix}%"))
        .bind(cutoff)
        .bind(price_cents - price_band_cents)
        .bind(price_cents + price_band_cents)
        .fetch_all(&self.pool)
        .await?;
        let mut filled = 0i64;
        let mut total = 0i64;
        for row in rows {
            let status: String = row.get(0);
            let n: i64 = row.get(1);
            total += n;
            if status == "filled" || status == "partially_filled" {
                filled += n;
            }
        }
        if total < min_samples.max(1) {
            return Ok(None);
        }
        Ok(Some(filled as f64 / total as f64))
    }

    async fn insert_bracket_arb_opportunities(
        &self,
        rows: &[BracketArbRecord],
    ) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO bracket_arb_opportunities
                    (detected_at, event_ticker, arb_type, n_brackets, cost_cents,
                     payout_cents, profit_cents, profit_after_fees_cents, max_sets,
                     total_profit_cents, legs, executed, execution_result)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.detected_at)
            .bind(&row.event_ticker)
            .bind(&row.arb_type)
            .bind(row.n_brackets)
            .bind(row.cost_cents)
            .bind(row.payout_cents)
            .bind(row.profit_cents)
            .bind(row.profit_after_fees_cents)
            .bind(row.max_sets)
            .bind(row.total_profit_cents)
            .bind(row.legs.to_string())
            .bind(row.executed)
            .bind(row.execution_result.to_string())
            .execute(&self.pool)
            .await?;
            ids.push(result.last_insert_rowid());
        }
        Ok(ids)
    }

    async fn insert_alert_events(&self, events: &[AlertEvent]) -> Result<u64> {
        let mut inserted = 0;
        for event in events {
            let result = sqlx::query(
                r#"
                INSERT INTO alert_events
                    (channel, event_type, market_ticker, message, status, metadata, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.channel)
            .bind(&event.event_type)
            .bind(&event.market_ticker)
            .bind(&event.message)
            .bind(&event.status)
            .bind(event.metadata.to_string())
            .bind(event.created_at)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }
}

// =============================================================================
// Null store for tests
// =============================================================================

/// No-op store: accepts every write, answers every read with nothing.
pub struct NullStore;

#[async_trait]
impl MarketStore for NullStore {
    async fn upsert_markets(&self, markets: &[Market]) -> Result<HashMap<String, i64>> {
        Ok(markets
            .iter()
            .enumerate()
            .map(|(idx, market)| (market.ticker.clone(), idx as i64 + 1))
            .collect())
    }

    async fn insert_snapshots(
        &self,
        snapshots: &[MarketSnapshot],
        _ticker_to_id: &HashMap<String, i64>,
    ) -> Result<u64> {
        Ok(snapshots.len() as u64)
    }

    async fn insert_spot_ticks(&self, ticks: &[SpotTick]) -> Result<u64> {
        Ok(ticks.len() as u64)
    }

    async fn insert_ensemble_samples(&self, samples: &[WeatherEnsembleSample]) -> Result<u64> {
        Ok(samples.len() as u64)
    }

    async fn insert_weather_bracket_probs(&self, rows: &[WeatherBracketProb]) -> Result<u64> {
        Ok(rows.len() as u64)
    }

    async fn insert_signals(&self, signals: &[SignalRecord]) -> Result<u64> {
        Ok(signals.len() as u64)
    }

    async fn insert_paper_orders(&self, orders: &[PaperOrder]) -> Result<Vec<i64>> {
        Ok((1..=orders.len() as i64).collect())
    }

    async fn insert_order_event(&self, _event: &OrderEvent) -> Result<()> {
        Ok(())
    }

    async fn update_order_status(
        &self,
        _order_id: i64,
        _status: OrderStatus,
        _response: Option<&Value>,
    ) -> Result<()> {
        Ok(())
    }

    async fn has_recent_paper_order(
        &self,
        _ticker: &str,
        _direction: Direction,
        _since: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(false)
    }

    async fn get_open_positions_summary(&self) -> Result<Vec<OpenPosition>> {
        Ok(Vec::new())
    }

    async fn get_recent_signals(&self, _limit: i64) -> Result<Vec<SignalRow>> {
        Ok(Vec::new())
    }

    async fn get_recent_paper_orders(&self, _limit: i64) -> Result<Vec<PaperOrderRow>> {
        Ok(Vec::new())
    }

    async fn get_open_sandbox_orders(&self, _since: DateTime<Utc>) -> Result<Vec<PaperOrderRow>> {
        Ok(Vec::new())
    }

    async fn get_latest_spot_tick(
        &self,
        _source: SpotSource,
        _symbol: &str,
    ) -> Result<Option<SpotTickRow>> {
        Ok(None)
    }

    async fn get_recent_spot_ticks(
        &self,
        _symbol: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<SpotTick>> {
        Ok(Vec::new())
    }

    async fn upsert_market_resolutions(&self, rows: &[MarketResolution]) -> Result<u64> {
        Ok(rows.len() as u64)
    }

    async fn materialize_prediction_accuracy(&self) -> Result<u64> {
        Ok(0)
    }

    async fn get_accuracy_metrics(
        &self,
        _days: i64,
        _signal_type: Option<SignalType>,
    ) -> Result<AccuracyMetrics> {
        Ok(AccuracyMetrics::default())
    }

    async fn get_calibration_curve(
        &self,
        _days: i64,
        _signal_type: Option<SignalType>,
    ) -> Result<Vec<CalibrationBucket>> {
        Ok(Vec::new())
    }

    async fn get_weather_backtest_rows(&self, _days: i64) -> Result<Vec<WeatherBacktestRow>> {
        Ok(Vec::new())
    }

    async fn get_paper_fill_metrics(&self, _days: i64) -> Result<FillMetrics> {
        Ok(FillMetrics::default())
    }

    async fn estimate_fill_probability(
        &self,
        _ticker_prefix: &str,
        _lookback_days: i64,
        _price_cents: i64,
        _price_band_cents: i64,
        _min_samples: i64,
    ) -> Result<Option<f64>> {
        Ok(None)
    }

    async fn insert_bracket_arb_opportunities(
        &self,
        rows: &[BracketArbRecord],
    ) -> Result<Vec<i64>> {
        Ok((1..=rows.len() as i64).collect())
    }

    async fn insert_alert_events(&self, events: &[AlertEvent]) -> Result<u64> {
        Ok(events.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::OrderSide;
    use serde_json::json;

    async fn create_test_db() -> Database {
        Database::in_memory().await.unwrap()
    }

    fn test_market(ticker: &str) -> Market {
        Market {
            ticker: ticker.to_string(),
            title: format!("Test market {ticker}"),
            status: "open".to_string(),
            close_time: Some(Utc::now() + Duration::hours(12)),
            raw: json!({"series_ticker": "KXHIGHNY"}),
        }
    }

    fn test_order(ticker: &str, status: OrderStatus, price_cents: i64) -> PaperOrder {
        PaperOrder {
            market_ticker: ticker.to_string(),
            signal_type: SignalType::Weather,
            direction: Direction::BuyYes,
            side: OrderSide::Yes,
            count: 5,
            limit_price_cents: price_cents,
            provider: "kalshi_demo".to_string(),
            status,
            reason: None,
            external_order_id: Some(format!("ext-{ticker}-{price_cents}")),
            request_payload: json!({}),
            response_payload: json!({}),
            created_at: Utc::now(),
        }
    }

    fn test_signal(ticker: &str, direction: Direction, model: f64, market: f64) -> SignalRecord {
        SignalRecord {
            signal_type: SignalType::Weather,
            market_ticker: ticker.to_string(),
            direction,
            model_probability: model,
            market_probability: market,
            edge_bps: ((model - market) * 10000.0 * 100.0).round() / 100.0,
            confidence: 0.8,
            data_source: crate::domain::models::SignalDataSource::Rest,
            vwap_cents: None,
            fillable_qty: None,
            liquidity_sufficient: None,
            details: json!({}),
            created_at: Utc::now(),
        }
    }

    fn test_resolution(ticker: &str, result: &str) -> MarketResolution {
        MarketResolution {
            ticker: ticker.to_string(),
            series_ticker: Some("KXHIGHNY".to_string()),
            event_ticker: None,
            market_type: "weather".to_string(),
            resolved_at: Some(Utc::now()),
            result: Some(result.to_string()),
            actual_value: Some(85.0),
            resolution_source: "kalshi_api".to_string(),
            collected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn market_upsert_is_idempotent() {
        let db = create_test_db().await;
        let markets = vec![test_market("KXHIGHNY-A")];
        let first = db.upsert_markets(&markets).await.unwrap();
        let second = db.upsert_markets(&markets).await.unwrap();
        assert_eq!(first.get("KXHIGHNY-A"), second.get("KXHIGHNY-A"));
    }

    #[tokio::test]
    async fn snapshot_insert_is_idempotent_on_ticker_ts() {
        let db = create_test_db().await;
        let markets = vec![test_market("KXHIGHNY-A")];
        let ids = db.upsert_markets(&markets).await.unwrap();
        let snapshot = MarketSnapshot {
            ticker: "KXHIGHNY-A".to_string(),
            ts: Utc::now(),
            yes_price: Some(0.4),
            no_price: Some(0.6),
            volume: Some(100.0),
            raw: json!({}),
        };
        let first = db
            .insert_snapshots(std::slice::from_ref(&snapshot), &ids)
            .await
            .unwrap();
        let second = db
            .insert_snapshots(std::slice::from_ref(&snapshot), &ids)
            .await
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn spot_ticks_dedupe_on_natural_key() {
        let db = create_test_db().await;
        let tick = SpotTick {
            ts: Utc::now(),
            source: SpotSource::Binance,
            symbol: "BTCUSD".to_string(),
            price_usd: 118000.0,
            raw: json!({}),
        };
        assert_eq!(
            db.insert_spot_ticks(std::slice::from_ref(&tick)).await.unwrap(),
            1
        );
        assert_eq!(
            db.insert_spot_ticks(std::slice::from_ref(&tick)).await.unwrap(),
            0
        );
        let latest = db
            .get_latest_spot_tick(SpotSource::Binance, "BTCUSD")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.price_usd, 118000.0);
    }

    #[tokio::test]
    async fn open_positions_roll_up_by_ticker_and_side() {
        let db = create_test_db().await;
        let orders = vec![
            test_order("KXHIGHNY-A", OrderStatus::Submitted, 40),
            test_order("KXHIGHNY-A", OrderStatus::PartiallyFilled, 44),
            test_order("KXHIGHNY-A", OrderStatus::Canceled, 90),
        ];
        db.insert_paper_orders(&orders).await.unwrap();
        let positions = db.get_open_positions_summary().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].contracts, 10);
        assert!((positions[0].avg_price_cents - 42.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn order_insert_writes_initial_event_and_status_updates() {
        let db = create_test_db().await;
        let ids = db
            .insert_paper_orders(&[test_order("KXBTC15M-1", OrderStatus::Submitted, 50)])
            .await
            .unwrap();
        let order_id = ids[0];
        let event_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM paper_trade_order_events WHERE order_id = ?")
                .bind(order_id)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(event_count, 1);

        db.update_order_status(order_id, OrderStatus::Filled, Some(&json!({"fill": 1})))
            .await
            .unwrap();
        let status: String =
            sqlx::query_scalar("SELECT status FROM paper_trade_orders WHERE id = ?")
                .bind(order_id)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(status, "filled");
    }

    #[tokio::test]
    async fn cooldown_lookup_sees_recent_orders() {
        let db = create_test_db().await;
        db.insert_paper_orders(&[test_order("KXHIGHNY-A", OrderStatus::Submitted, 40)])
            .await
            .unwrap();
        let since = Utc::now() - Duration::minutes(30);
        assert!(db
            .has_recent_paper_order("KXHIGHNY-A", Direction::BuyYes, since)
            .await
            .unwrap());
        assert!(!db
            .has_recent_paper_order("KXHIGHNY-A", Direction::BuyNo, since)
            .await
            .unwrap());
        assert!(!db
            .has_recent_paper_order("KXHIGHNY-B", Direction::BuyYes, since)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn prediction_accuracy_materializes_once_per_signal() {
        let db = create_test_db().await;
        db.insert_signals(&[
            test_signal("KXHIGHNY-A", Direction::BuyYes, 0.7, 0.5),
            test_signal("KXHIGHNY-B", Direction::BuyNo, 0.2, 0.4),
            test_signal("KXHIGHNY-C", Direction::Flat, 0.5, 0.5),
        ])
        .await
        .unwrap();
        db.upsert_market_resolutions(&[
            test_resolution("KXHIGHNY-A", "yes"),
            test_resolution("KXHIGHNY-B", "no"),
            test_resolution("KXHIGHNY-C", "yes"),
        ])
        .await
        .unwrap();

        let first = db.materialize_prediction_accuracy().await.unwrap();
        assert_eq!(first, 2, "flat signals are not scored");
        let second = db.materialize_prediction_accuracy().await.unwrap();
        assert_eq!(second, 0);

        let metrics = db.get_accuracy_metrics(30, None).await.unwrap();
        assert_eq!(metrics.n_signals, 2);
        // buy_yes at market 0.5 resolving yes earns 50c; buy_no at yes-prob
        // 0.4 resolving no earns 40c.
        assert_eq!(metrics.hit_rate, Some(1.0));
        assert!((metrics.total_pnl.unwrap() - 90.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn fill_probability_needs_minimum_samples() {
        let db = create_test_db().await;
        let mut orders = Vec::new();
        for i in 0..10 {
            let status = if i < 6 {
                OrderStatus::Filled
            } else {
                OrderStatus::Canceled
            };
            orders.push(test_order("KXHIGHNY-A", status, 40 + (i % 3)));
        }
        db.insert_paper_orders(&orders).await.unwrap();

        let too_few = db
            .estimate_fill_probability("KXHIGHNY", 14, 41, 10, 20)
            .await
            .unwrap();
        assert!(too_few.is_none());

        let estimate = db
            .estimate_fill_probability("KXHIGHNY", 14, 41, 10, 10)
            .await
            .unwrap()
            .unwrap();
        assert!((estimate - 0.6).abs() < 1e-9);

        // A band far from the orders sees no samples.
        let out_of_band = db
            .estimate_fill_probability("KXHIGHNY", 14, 90, 5, 1)
            .await
            .unwrap();
        assert!(out_of_band.is_none());
    }

    #[tokio::test]
    async fn weather_backtest_rows_use_latest_collection() {
        let db = create_test_db().await;
        let target_date = Utc::now().date_naive();
        let earlier = Utc::now() - Duration::hours(3);
        let later = Utc::now() - Duration::hours(1);
        db.insert_weather_bracket_probs(&[
            WeatherBracketProb {
                collected_at: earlier,
                target_date,
                ticker: "KXHIGHNY-A".to_string(),
                lower_bound: Some(85.0),
                upper_bound: Some(87.0),
                model_prob: 0.3,
                market_prob: Some(0.5),
                sample_count: 60,
            },
            WeatherBracketProb {
                collected_at: later,
                target_date,
                ticker: "KXHIGHNY-A".to_string(),
                lower_bound: Some(85.0),
                upper_bound: Some(87.0),
                model_prob: 0.8,
                market_prob: Some(0.55),
                sample_count: 60,
            },
        ])
        .await
        .unwrap();
        db.upsert_market_resolutions(&[test_resolution("KXHIGHNY-A", "yes")])
            .await
            .unwrap();

        let rows = db.get_weather_backtest_rows(30).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].model_prob - 0.8).abs() < 1e-9);
        assert_eq!(rows[0].outcome(), 1);
    }

    #[tokio::test]
    async fn fill_metrics_count_statuses() {
        let db = create_test_db().await;
        let ids = db
            .insert_paper_orders(&[
                test_order("KXHIGHNY-A", OrderStatus::Submitted, 40),
                test_order("KXHIGHNY-B", OrderStatus::Filled, 42),
                test_order("KXHIGHNY-C", OrderStatus::Canceled, 44),
            ])
            .await
            .unwrap();
        db.insert_order_event(&OrderEvent {
            order_id: ids[1],
            ts: Utc::now(),
            event_type: "filled".to_string(),
            status: OrderStatus::Filled,
            queue_position: None,
            details: json!({}),
        })
        .await
        .unwrap();

        let metrics = db.get_paper_fill_metrics(7).await.unwrap();
        assert_eq!(metrics.total_orders, 3);
        assert_eq!(metrics.filled_orders, 1);
        assert_eq!(metrics.open_orders, 1);
        assert_eq!(metrics.canceled_orders, 1);
        assert!(metrics.avg_fill_minutes.is_some());
    }
}
