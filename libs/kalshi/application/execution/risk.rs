//! Kelly-based order sizing under portfolio caps.

use crate::domain::models::{OrderSide, SignalRecord};
use crate::infrastructure::config::PaperTradingConfig;

/// Kelly fraction for a binary contract bought at `market_price_cents`.
///
/// Payoffs are in cents: a YES contract wins `100 - price` and risks
/// `price`; NO is the mirror. Returns 0 when the edge or the win payoff
/// is non-positive.
pub fn kelly_fraction(model_prob: f64, market_price_cents: i64, side: OrderSide) -> f64 {
    let p = model_prob.clamp(0.0, 1.0);
    let price = market_price_cents.clamp(1, 99) as f64;

    let (win, edge) = match side {
        OrderSide::Yes => {
            let win = 100.0 - price;
            let loss = price;
            (win, p * win - (1.0 - p) * loss)
        }
        OrderSide::No => {
            let win = price;
            let loss = 100.0 - price;
            (win, (1.0 - p) * win - p * loss)
        }
    };
    if win <= 0.0 || edge <= 0.0 {
        return 0.0;
    }
    edge / win
}

/// Contract count for a candidate order.
///
/// Fixed mode returns the configured count. Kelly mode scales the
/// fraction by fill probability, the configured Kelly scale, and signal
/// confidence, then caps by per-position and remaining-portfolio dollars.
pub fn compute_order_size(
    signal: &SignalRecord,
    side: OrderSide,
    market_price_cents: i64,
    config: &PaperTradingConfig,
    current_exposure_dollars: f64,
    bankroll_dollars: Option<f64>,
    fill_probability: Option<f64>,
) -> i64 {
    if config.sizing_mode == "fixed" {
        return config.contract_count;
    }

    let confidence = signal.confidence.clamp(0.0, 1.0);
    let bankroll = match bankroll_dollars {
        Some(bankroll) if bankroll > 0.0 => bankroll,
        _ => config.max_portfolio_exposure_dollars,
    };

    let mut kelly = kelly_fraction(signal.model_probability, market_price_cents, side);
    if kelly <= 0.0 {
        return 0;
    }

    // Thin books get sized down by their empirical fill rate.
    let fill_prob = fill_probability
        .unwrap_or(config.default_fill_probability)
        .clamp(0.0, 1.0);
    kelly *= fill_prob;
    if kelly <= 0.0 {
        return 0;
    }

    let mut target_dollars = bankroll * kelly * config.kelly_fraction_scale * confidence;
    target_dollars = target_dollars.min(config.max_position_dollars);
    let remaining_exposure =
        (config.max_portfolio_exposure_dollars - current_exposure_dollars).max(0.0);
    target_dollars = target_dollars.min(remaining_exposure);
    if target_dollars <= 0.0 {
        return 0;
    }

    let contract_cost = market_price_cents.clamp(1, 99) as f64 / 100.0;
    let contracts = (target_dollars / contract_cost).floor() as i64;
    if contracts > 0 {
        contracts.max(1)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Direction, SignalDataSource, SignalType};
    use chrono::Utc;
    use serde_json::json;

    fn config() -> PaperTradingConfig {
        PaperTradingConfig {
            sizing_mode: "kelly".to_string(),
            contract_count: 2,
            kelly_fraction_scale: 0.25,
            max_position_dollars: 50.0,
            max_portfolio_exposure_dollars: 500.0,
            default_fill_probability: 0.5,
            ..PaperTradingConfig::default()
        }
    }

    fn signal(model_probability: f64, confidence: f64) -> SignalRecord {
        SignalRecord {
            signal_type: SignalType::Btc,
            market_ticker: "KXBTC15M-TEST".to_string(),
            direction: Direction::BuyYes,
            model_probability,
            market_probability: 0.5,
            edge_bps: 0.0,
            confidence,
            data_source: SignalDataSource::Rest,
            vwap_cents: None,
            fillable_qty: None,
            liquidity_sufficient: None,
            details: json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn kelly_positive_edge() {
        // (0.6*50 - 0.4*50) / 50 = 0.2
        let value = kelly_fraction(0.6, 50, OrderSide::Yes);
        assert!((value - 0.2).abs() < 1e-9);
    }

    #[test]
    fn kelly_zero_and_negative_edge() {
        assert_eq!(kelly_fraction(0.5, 50, OrderSide::Yes), 0.0);
        assert_eq!(kelly_fraction(0.4, 50, OrderSide::Yes), 0.0);
    }

    #[test]
    fn kelly_no_side_mirrors_yes() {
        let no_side = kelly_fraction(0.4, 50, OrderSide::No);
        let yes_side = kelly_fraction(0.6, 50, OrderSide::Yes);
        assert!((no_side - yes_side).abs() < 1e-9);
    }

    #[test]
    fn fixed_mode_returns_configured_count() {
        let mut config = config();
        config.sizing_mode = "fixed".to_string();
        let contracts =
            compute_order_size(&signal(0.9, 1.0), OrderSide::Yes, 50, &config, 0.0, None, None);
        assert_eq!(contracts, 2);
    }

    #[test]
    fn sizing_respects_max_position() {
        let mut config = config();
        config.max_position_dollars = 10.0;
        let contracts = compute_order_size(
            &signal(0.8, 1.0),
            OrderSide::Yes,
            20,
            &config,
            0.0,
            Some(500.0),
            Some(1.0),
        );
        // 10 dollars at 0.20 per contract
        assert!(contracts <= 50);
        assert!(contracts > 0);
    }

    #[test]
    fn sizing_respects_portfolio_headroom() {
        let mut config = config();
        config.max_portfolio_exposure_dollars = 100.0;
        let contracts = compute_order_size(
            &signal(0.8, 1.0),
            OrderSide::Yes,
            50,
            &config,
            97.0,
            Some(500.0),
            Some(1.0),
        );
        assert!(contracts <= 6);
    }

    #[test]
    fn fill_probability_scales_size_down() {
        let config = config();
        let high_fill = compute_order_size(
            &signal(0.75, 1.0),
            OrderSide::Yes,
            40,
            &config,
            0.0,
            Some(500.0),
            Some(1.0),
        );
        let low_fill = compute_order_size(
            &signal(0.75, 1.0),
            OrderSide::Yes,
            40,
            &config,
            0.0,
            Some(500.0),
            Some(0.2),
        );
        assert!(high_fill > low_fill);
    }

    #[test]
    fn exhausted_portfolio_returns_zero() {
        let config = config();
        let contracts = compute_order_size(
            &signal(0.75, 1.0),
            OrderSide::Yes,
            40,
            &config,
            500.0,
            Some(0.0),
            Some(1.0),
        );
        assert_eq!(contracts, 0);
    }

    #[test]
    fn zero_confidence_returns_zero() {
        let config = config();
        let contracts = compute_order_size(
            &signal(0.75, 0.0),
            OrderSide::Yes,
            40,
            &config,
            0.0,
            Some(500.0),
            Some(1.0),
        );
        assert_eq!(contracts, 0);
    }
}
