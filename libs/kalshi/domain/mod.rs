//! Domain Layer
//!
//! Pure business entities and domain logic. No dependencies on
//! infrastructure or application layers.

pub mod fees;
pub mod models;
pub mod order_lifecycle;
pub mod orderbook;
pub mod scoring;

pub use fees::FeeCalculator;
pub use models::{
    AlertEvent, Direction, Market, MarketResolution, MarketSnapshot, OrderEvent, OrderSide,
    OrderStatus, PaperOrder, PriceTier, SignalDataSource, SignalRecord, SignalType, SpotSource,
    SpotTick, WeatherBracketProb, WeatherEnsembleSample,
};
pub use order_lifecycle::{
    extract_order_id, extract_order_status, extract_queue_positions, normalize_order_status,
};
pub use orderbook::{
    best_bid_and_depth, compute_vwap, effective_no_ask_vwap, effective_yes_ask_vwap,
    normalize_levels, BookState, OrderBookLevels,
};
