//! Infrastructure Layer
//!
//! External-world adapters: configuration, logging, the exchange client,
//! the persistent store, WebSocket feeds, and the notifier.

pub mod client;
pub mod config;
pub mod database;
pub mod logging;
pub mod notifier;
pub mod ws;

pub use client::{KalshiAuth, KalshiClient, RestError};
pub use config::{BotMode, ConfigError, Settings, TradingProfile};
pub use database::{Database, MarketStore, NullStore};
pub use logging::{init_tracing, init_tracing_with_level};
pub use notifier::TelegramNotifier;
pub use ws::{BinanceFeed, CoinbaseFeed, KalshiFeed, KrakenFeed, LifecycleEvent};
