//! Live market-data feeds built on the hypersockets manager.
//!
//! Each feed owns its in-memory buffers; readers access them through the
//! feed's accessors (or the [`SpotFeedView`] trait for the crypto feeds).

pub mod binance;
pub mod coinbase;
pub mod kalshi;
pub mod kraken;

use chrono::{DateTime, Utc};

pub use binance::BinanceFeed;
pub use coinbase::CoinbaseFeed;
pub use kalshi::{KalshiFeed, LifecycleEvent};
pub use kraken::KrakenFeed;

/// Uniform read surface over the crypto spot feeds.
pub trait SpotFeedView: Send + Sync {
    fn is_connected(&self) -> bool;
    /// Seconds since the last tick; infinity before the first one.
    fn age_seconds(&self) -> f64;
    fn latest_price(&self) -> Option<f64>;
    fn last_update_time(&self) -> Option<DateTime<Utc>>;
    /// Prices inside the trailing window, oldest first. Only feeds with
    /// trade history override this.
    fn price_history_window(&self, _window_seconds: i64) -> Vec<f64> {
        Vec::new()
    }
}
