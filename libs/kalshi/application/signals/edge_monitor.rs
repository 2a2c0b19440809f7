//! Edge-decay monitoring for open positions.

use crate::domain::models::{Direction, OrderSide};
use crate::infrastructure::database::OpenPosition;
use std::collections::{HashMap, HashSet};

/// A signal summary as seen by the monitor
#[derive(Debug, Clone)]
pub struct CurrentSignal {
    pub market_ticker: String,
    pub direction: Direction,
    pub edge_bps: f64,
}

/// Alerts for open positions whose thesis no longer holds: no current
/// signal (for still-active tickers), a flipped direction, or an edge
/// decayed below the threshold. Positions hedged on both sides of the
/// same ticker are skipped entirely.
pub fn build_edge_decay_alerts(
    open_positions: &[OpenPosition],
    current_signals: &[CurrentSignal],
    edge_decay_alert_threshold_bps: i64,
    active_market_tickers: &HashSet<String>,
) -> Vec<String> {
    let signal_by_ticker: HashMap<&str, &CurrentSignal> = current_signals
        .iter()
        .map(|signal| (signal.market_ticker.as_str(), signal))
        .collect();

    let mut sides_by_ticker: HashMap<&str, HashSet<&str>> = HashMap::new();
    for position in open_positions {
        sides_by_ticker
            .entry(position.market_ticker.as_str())
            .or_default()
            .insert(position.side.as_str());
    }

    let mut alerts = Vec::new();
    for position in open_positions {
        let ticker = position.market_ticker.as_str();
        if sides_by_ticker
            .get(ticker)
            .map(|sides| sides.len() >= 2)
            .unwrap_or(false)
        {
            continue;
        }
        let side = match OrderSide::parse(&position.side) {
            Some(side) => side,
            None => continue,
        };

        let signal = match signal_by_ticker.get(ticker) {
            Some(signal) => *signal,
            None => {
                // Closed-out tickers age off the active set; don't nag
                // about those.
                if active_market_tickers.contains(ticker) {
                    alerts.push(format!(
                        "⚠️ No current signal for {ticker} while a {} position is open.",
                        side.as_str().to_uppercase()
                    ));
                }
                continue;
            }
        };

        let expected = side.expected_direction();
        if signal.direction.is_actionable() && signal.direction != expected {
            alerts.push(format!(
                "🔴 Signal flipped on {ticker}: open side={} current={} edge={:.2} bps",
                side.as_str().to_uppercase(),
                signal.direction.as_str(),
                signal.edge_bps,
            ));
            continue;
        }

        if signal.edge_bps.abs() < edge_decay_alert_threshold_bps as f64 {
            alerts.push(format!(
                "⚠️ Edge decayed on {ticker}: current edge={:.2} bps (< {} bps)",
                signal.edge_bps, edge_decay_alert_threshold_bps,
            ));
        }
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(ticker: &str, side: &str) -> OpenPosition {
        OpenPosition {
            market_ticker: ticker.to_string(),
            side: side.to_string(),
            contracts: 5,
            avg_price_cents: 45.0,
        }
    }

    fn signal(ticker: &str, direction: Direction, edge_bps: f64) -> CurrentSignal {
        CurrentSignal {
            market_ticker: ticker.to_string(),
            direction,
            edge_bps,
        }
    }

    fn active(tickers: &[&str]) -> HashSet<String> {
        tickers.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn hedged_position_suppresses_decay_alerts() {
        let positions = vec![
            position("KXBTC15M-TEST", "yes"),
            position("KXBTC15M-TEST", "no"),
        ];
        let signals = vec![signal("KXBTC15M-TEST", Direction::BuyYes, 20.0)];
        let alerts =
            build_edge_decay_alerts(&positions, &signals, 75, &active(&["KXBTC15M-TEST"]));
        assert!(alerts.is_empty());
    }

    #[test]
    fn no_signal_alert_skips_stale_tickers() {
        let positions = vec![position("KXBTC15M-OLD", "no")];
        let alerts =
            build_edge_decay_alerts(&positions, &[], 75, &active(&["KXBTC15M-LIVE"]));
        assert!(alerts.is_empty());

        let alerts =
            build_edge_decay_alerts(&positions, &[], 75, &active(&["KXBTC15M-OLD"]));
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("No current signal"));
    }

    #[test]
    fn signal_flip_generates_alert() {
        let positions = vec![position("KXHIGHNY-TEST", "yes")];
        let signals = vec![signal("KXHIGHNY-TEST", Direction::BuyNo, -300.0)];
        let alerts =
            build_edge_decay_alerts(&positions, &signals, 75, &active(&["KXHIGHNY-TEST"]));
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("Signal flipped"));
    }

    #[test]
    fn decayed_edge_generates_alert() {
        let positions = vec![position("KXHIGHNY-TEST", "yes")];
        let signals = vec![signal("KXHIGHNY-TEST", Direction::BuyYes, 30.0)];
        let alerts =
            build_edge_decay_alerts(&positions, &signals, 75, &active(&["KXHIGHNY-TEST"]));
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("Edge decayed"));
    }

    #[test]
    fn healthy_position_stays_quiet() {
        let positions = vec![position("KXHIGHNY-TEST", "yes")];
        let signals = vec![signal("KXHIGHNY-TEST", Direction::BuyYes, 400.0)];
        let alerts =
            build_edge_decay_alerts(&positions, &signals, 75, &active(&["KXHIGHNY-TEST"]));
        assert!(alerts.is_empty());
    }
}
