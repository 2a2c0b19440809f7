//! Kalshi exchange client: request signing, REST surface, and the
//! stub-mode generator used in development.

pub mod auth;
pub mod mock;
pub mod rest;
pub mod types;

pub use auth::{AuthError, KalshiAuth};
pub use mock::MockDataGenerator;
pub use rest::{KalshiClient, RestError};
pub use types::{as_f64, as_i64, build_ws_url, market_payload, parse_iso_datetime};
