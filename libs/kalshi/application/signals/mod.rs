//! Signal engine: per-market fair values, signed edges, and the
//! cross-bracket arbitrage scanner.

pub mod bracket_arb;
pub mod btc;
pub mod edge_monitor;
pub mod weather;

use crate::domain::models::Direction;

pub use bracket_arb::{scan_bracket_arbitrage, ArbLeg, BracketArbOpportunity};
pub use btc::{build_btc_signals, SpotQuote, SpotQuotes};
pub use edge_monitor::build_edge_decay_alerts;
pub use weather::{build_weather_probabilities, build_weather_signals, parse_bracket_bounds};

/// Threshold rule shared by every signal family.
pub fn direction_for_edge(edge_bps: f64, min_edge_bps: i64) -> Direction {
    let threshold = min_edge_bps as f64;
    if edge_bps >= threshold {
        Direction::BuyYes
    } else if edge_bps <= -threshold {
        Direction::BuyNo
    } else {
        Direction::Flat
    }
}

/// `round((model - market) * 10000, 2)`
pub fn edge_bps(model_prob: f64, market_prob: f64) -> f64 {
    ((model_prob - market_prob) * 10000.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_thresholds() {
        assert_eq!(direction_for_edge(500.0, 500), Direction::BuyYes);
        assert_eq!(direction_for_edge(-500.0, 500), Direction::BuyNo);
        assert_eq!(direction_for_edge(499.9, 500), Direction::Flat);
        assert_eq!(direction_for_edge(-499.9, 500), Direction::Flat);
    }

    #[test]
    fn edge_rounds_to_two_decimals() {
        assert_eq!(edge_bps(0.61234, 0.5), 1123.4);
        assert_eq!(edge_bps(0.5, 0.5), 0.0);
        assert_eq!(edge_bps(0.4, 0.5), -1000.0);
    }
}
