//! Poll-interval REST collectors.

pub mod crypto;
pub mod resolutions;
pub mod weather;

pub use crypto::fetch_btc_spot_ticks;
pub use resolutions::collect_market_resolutions;
pub use weather::fetch_weather_ensemble_samples;
