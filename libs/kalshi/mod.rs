//! Kalshi Signal Pipeline
//!
//! Market-data collection, signal generation, and paper-trade execution for
//! Kalshi binary prediction markets (NYC daily-high weather brackets and
//! 15-minute BTC brackets).

// Core layers
pub mod domain;
pub mod infrastructure;
pub mod application;
pub mod utils;

// Re-export commonly used items from infrastructure
pub use infrastructure::{
    client::{KalshiAuth, KalshiClient, RestError},
    config::{BotMode, ConfigError, Settings, TradingProfile},
    database::{Database, MarketStore, NullStore},
    notifier::TelegramNotifier,
};

// Re-export from application layer
pub use application::{
    pipeline::DataPipeline,
    price_provider::PriceProvider,
    runtime::BotRuntime,
};

// Re-export from domain layer
pub use domain::models::{
    AlertEvent, Direction, Market, MarketResolution, MarketSnapshot, OrderSide, OrderStatus,
    PaperOrder, PriceTier, SignalRecord, SignalType, SpotSource, SpotTick,
    WeatherEnsembleSample,
};
pub use domain::orderbook::BookState;

// Re-export utils
pub use utils::{heartbeat::Heartbeat, shutdown::ShutdownManager};
