//! Database schema management

use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema initialization failed: {0}")]
    InitFailed(#[from] sqlx::Error),
}

/// Natural-key uniqueness lives in the schema so inserts stay idempotent
/// no matter which code path writes them.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS markets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    status TEXT NOT NULL,
    close_time TEXT,
    raw_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS market_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id INTEGER NOT NULL REFERENCES markets(id),
    snapshot_ts TEXT NOT NULL,
    yes_price REAL,
    no_price REAL,
    volume REAL,
    raw_json TEXT NOT NULL DEFAULT '{}',
    UNIQUE (market_id, snapshot_ts)
);

CREATE TABLE IF NOT EXISTS crypto_spot_ticks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    source TEXT NOT NULL,
    symbol TEXT NOT NULL,
    price_usd REAL NOT NULL,
    raw_json TEXT NOT NULL DEFAULT '{}',
    UNIQUE (ts, source, symbol)
);
CREATE INDEX IF NOT EXISTS idx_crypto_ticks_symbol_ts
    ON crypto_spot_ticks (symbol, ts);

CREATE TABLE IF NOT EXISTS weather_ensemble_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collected_at TEXT NOT NULL,
    target_date TEXT NOT NULL,
    model TEXT NOT NULL,
    member TEXT NOT NULL,
    max_temp_f REAL NOT NULL,
    source TEXT NOT NULL,
    UNIQUE (collected_at, target_date, model, member)
);

CREATE TABLE IF NOT EXISTS weather_bracket_probabilities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collected_at TEXT NOT NULL,
    target_date TEXT NOT NULL,
    ticker TEXT NOT NULL,
    lower_bound REAL,
    upper_bound REAL,
    model_prob REAL NOT NULL,
    market_prob REAL,
    sample_count INTEGER NOT NULL,
    UNIQUE (collected_at, target_date, ticker)
);
CREATE INDEX IF NOT EXISTS idx_weather_probs_ticker_date
    ON weather_bracket_probabilities (ticker, target_date);

CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    signal_type TEXT NOT NULL,
    market_ticker TEXT NOT NULL,
    direction TEXT NOT NULL,
    model_probability REAL NOT NULL,
    market_probability REAL NOT NULL,
    edge_bps REAL NOT NULL,
    confidence REAL NOT NULL,
    data_source TEXT NOT NULL,
    vwap_cents REAL,
    fillable_qty INTEGER,
    liquidity_sufficient INTEGER,
    details TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_signals_created ON signals (created_at);
CREATE INDEX IF NOT EXISTS idx_signals_ticker ON signals (market_ticker);

CREATE TABLE IF NOT EXISTS paper_trade_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    market_ticker TEXT NOT NULL,
    signal_type TEXT NOT NULL,
    direction TEXT NOT NULL,
    side TEXT NOT NULL,
    count INTEGER NOT NULL,
    limit_price_cents INTEGER NOT NULL,
    provider TEXT NOT NULL,
    status TEXT NOT NULL,
    reason TEXT,
    external_order_id TEXT,
    request_payload TEXT NOT NULL DEFAULT '{}',
    response_payload TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_paper_orders_ticker ON paper_trade_orders (market_ticker);
CREATE INDEX IF NOT EXISTS idx_paper_orders_status ON paper_trade_orders (status);
CREATE INDEX IF NOT EXISTS idx_paper_orders_created ON paper_trade_orders (created_at);

CREATE TABLE IF NOT EXISTS paper_trade_order_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER NOT NULL REFERENCES paper_trade_orders(id),
    ts TEXT NOT NULL,
    event_type TEXT NOT NULL,
    status TEXT NOT NULL,
    queue_position INTEGER,
    details TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_order_events_order ON paper_trade_order_events (order_id);

CREATE TABLE IF NOT EXISTS market_resolutions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker TEXT NOT NULL UNIQUE,
    series_ticker TEXT,
    event_ticker TEXT,
    market_type TEXT NOT NULL,
    resolved_at TEXT,
    result TEXT,
    actual_value REAL,
    resolution_source TEXT NOT NULL,
    collected_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS prediction_accuracy (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id INTEGER NOT NULL UNIQUE REFERENCES signals(id),
    market_ticker TEXT NOT NULL,
    signal_type TEXT NOT NULL,
    direction TEXT NOT NULL,
    model_probability REAL NOT NULL,
    market_probability REAL NOT NULL,
    edge_bps REAL NOT NULL,
    result TEXT NOT NULL,
    outcome INTEGER NOT NULL,
    pnl_per_contract_cents REAL NOT NULL,
    resolved_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_prediction_accuracy_created
    ON prediction_accuracy (created_at);

CREATE TABLE IF NOT EXISTS bracket_arb_opportunities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    detected_at TEXT NOT NULL,
    event_ticker TEXT NOT NULL,
    arb_type TEXT NOT NULL,
    n_brackets INTEGER NOT NULL,
    cost_cents INTEGER NOT NULL,
    payout_cents INTEGER NOT NULL,
    profit_cents INTEGER NOT NULL,
    profit_after_fees_cents INTEGER NOT NULL,
    max_sets INTEGER NOT NULL,
    total_profit_cents INTEGER NOT NULL,
    legs TEXT NOT NULL DEFAULT '[]',
    executed INTEGER NOT NULL DEFAULT 0,
    execution_result TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS alert_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel TEXT NOT NULL,
    event_type TEXT NOT NULL,
    market_ticker TEXT,
    message TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
"#;

/// Create all tables and indexes if they do not exist.
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), SchemaError> {
    let mut tx = pool.begin().await?;
    for statement in SCHEMA_SQL.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}
