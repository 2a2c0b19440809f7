//! Aggregate prediction-accuracy reporting.

use crate::domain::models::SignalType;
use crate::domain::scoring::CalibrationBucket;
use crate::infrastructure::database::MarketStore;
use serde::Serialize;

/// Windowed accuracy summary for one signal family (or all)
#[derive(Debug, Clone, Serialize)]
pub struct AccuracyReport {
    pub market_type: String,
    pub days: i64,
    pub n_signals: i64,
    pub brier_score: Option<f64>,
    pub market_brier_score: Option<f64>,
    pub log_loss: Option<f64>,
    pub edge_reliability: Option<f64>,
    pub hit_rate: Option<f64>,
    pub avg_pnl_per_contract: Option<f64>,
    pub total_pnl: Option<f64>,
    /// `(avg_pnl / 100) * sqrt(n)`: a proxy, not a true Sharpe ratio,
    /// and reported as `sharpe_proxy` everywhere for that reason.
    pub sharpe_proxy: Option<f64>,
    pub calibration_curve: Vec<CalibrationBucket>,
}

fn signal_type_for_market_type(market_type: &str) -> Option<SignalType> {
    match market_type.trim().to_lowercase().as_str() {
        "all" | "*" | "" => None,
        "weather" | "kxhighny" => Some(SignalType::Weather),
        "btc" | "btc_15m" | "kxbtc15m" => Some(SignalType::Btc),
        _ => None,
    }
}

fn compute_sharpe_proxy(avg_pnl: Option<f64>, n_signals: i64) -> Option<f64> {
    let avg_pnl = avg_pnl?;
    if n_signals <= 1 {
        return None;
    }
    let scaled = (avg_pnl / 100.0) * (n_signals as f64).sqrt();
    Some((scaled * 1e4).round() / 1e4)
}

pub async fn generate_accuracy_report(
    store: &dyn MarketStore,
    market_type: &str,
    days: i64,
) -> AccuracyReport {
    let signal_type = signal_type_for_market_type(market_type);
    let metrics = store
        .get_accuracy_metrics(days, signal_type)
        .await
        .unwrap_or_default();
    let curve = store
        .get_calibration_curve(days, signal_type)
        .await
        .unwrap_or_default();
    let sharpe_proxy = compute_sharpe_proxy(metrics.avg_pnl_per_contract, metrics.n_signals);
    AccuracyReport {
        market_type: market_type.to_string(),
        days,
        n_signals: metrics.n_signals,
        brier_score: metrics.brier_score,
        market_brier_score: metrics.market_brier_score,
        log_loss: metrics.log_loss,
        edge_reliability: metrics.edge_reliability,
        hit_rate: metrics.hit_rate,
        avg_pnl_per_contract: metrics.avg_pnl_per_contract,
        total_pnl: metrics.total_pnl,
        sharpe_proxy,
        calibration_curve: curve,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::NullStore;

    #[test]
    fn market_type_mapping() {
        assert_eq!(signal_type_for_market_type("all"), None);
        assert_eq!(
            signal_type_for_market_type("weather"),
            Some(SignalType::Weather)
        );
        assert_eq!(
            signal_type_for_market_type("KXBTC15M"),
            Some(SignalType::Btc)
        );
        assert_eq!(signal_type_for_market_type("sports"), None);
    }

    #[test]
    fn sharpe_proxy_needs_multiple_signals() {
        assert_eq!(compute_sharpe_proxy(Some(10.0), 1), None);
        assert_eq!(compute_sharpe_proxy(None, 100), None);
        // 10c average over 100 signals: 0.1 * 10 = 1.0
        assert_eq!(compute_sharpe_proxy(Some(10.0), 100), Some(1.0));
    }

    #[tokio::test]
    async fn empty_store_yields_empty_report() {
        let report = generate_accuracy_report(&NullStore, "all", 30).await;
        assert_eq!(report.n_signals, 0);
        assert!(report.brier_score.is_none());
        assert!(report.sharpe_proxy.is_none());
        assert!(report.calibration_curve.is_empty());
    }
}
