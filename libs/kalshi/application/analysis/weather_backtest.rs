//! Weather calibration report and the live-trading gates it feeds.

use crate::domain::scoring::{brier_score, calibration_table, log_loss, CalibrationBucket};
use crate::infrastructure::database::{MarketStore, WeatherBacktestRow};
use crate::infrastructure::config::Settings;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;

/// Edge required before the simulated pnl counts a bracket as traded.
const SIM_EDGE_THRESHOLD: f64 = 0.05;

/// Calibration of the weather model against resolved brackets
#[derive(Debug, Clone, Serialize)]
pub struct WeatherCalibrationReport {
    pub days: i64,
    pub n_brackets: i64,
    pub resolved_days: i64,
    pub model_brier: Option<f64>,
    pub market_brier: Option<f64>,
    /// `market_brier - model_brier`; positive means the model beats the
    /// market
    pub brier_advantage: Option<f64>,
    pub model_log_loss: Option<f64>,
    pub market_log_loss: Option<f64>,
    pub edge_hit_rate: Option<f64>,
    pub edge_miss_rate: Option<f64>,
    pub sim_pnl_cents: f64,
    pub calibration_table: Vec<CalibrationBucket>,
    pub max_calibration_error: Option<f64>,
}

impl WeatherCalibrationReport {
    fn empty(days: i64) -> Self {
        Self {
            days,
            n_brackets: 0,
            resolved_days: 0,
            model_brier: None,
            market_brier: None,
            brier_advantage: None,
            model_log_loss: None,
            market_log_loss: None,
            edge_hit_rate: None,
            edge_miss_rate: None,
            sim_pnl_cents: 0.0,
            calibration_table: Vec::new(),
            max_calibration_error: None,
        }
    }
}

/// Per-gate pass/fail, all of which must hold for live weather trading
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LiveGates {
    pub min_resolved_days: bool,
    pub min_brier_advantage: bool,
    pub min_sim_profit_cents: bool,
    pub max_calibration_error: bool,
}

impl LiveGates {
    pub fn all_pass(&self) -> bool {
        self.min_resolved_days
            && self.min_brier_advantage
            && self.min_sim_profit_cents
            && self.max_calibration_error
    }
}

pub async fn generate_weather_calibration(
    store: &dyn MarketStore,
    days: i64,
) -> WeatherCalibrationReport {
    let rows = store.get_weather_backtest_rows(days).await.unwrap_or_default();
    build_report(days, &rows)
}

pub(crate) fn build_report(days: i64, rows: &[WeatherBacktestRow]) -> WeatherCalibrationReport {
    if rows.is_empty() {
        return WeatherCalibrationReport::empty(days);
    }

    let mut model_predictions: Vec<(f64, i64)> = Vec::with_capacity(rows.len());
    let mut market_predictions: Vec<(f64, i64)> = Vec::new();
    let mut resolved_dates: HashSet<NaiveDate> = HashSet::new();
    let mut edge_positive_total = 0i64;
    let mut edge_positive_hits = 0i64;
    let mut sim_pnl_cents = 0.0;

    for row in rows {
        let outcome = row.outcome();
        resolved_dates.insert(row.target_date);
        model_predictions.push((row.model_prob, outcome));
        if let Some(market_prob) = row.market_prob {
            market_predictions.push((market_prob, outcome));
        }

        if let Some(edge) = row.edge() {
            if edge > 0.0 {
                edge_positive_total += 1;
                if outcome == 1 {
                    edge_positive_hits += 1;
                }
            }
            if edge >= SIM_EDGE_THRESHOLD {
                if let Some(market_prob) = row.market_prob {
                    let price_cents = market_prob * 100.0;
                    if outcome == 1 {
                        sim_pnl_cents += 100.0 - price_cents;
                    } else {
                        sim_pnl_cents -= price_cents;
                    }
                }
            }
        }
    }

    let model_brier = brier_score(&model_predictions);
    let market_brier = brier_score(&market_predictions);
    let brier_advantage = match (model_brier, market_brier) {
        (Some(model), Some(market)) => Some(market - model),
        _ => None,
    };
    let (table, max_calibration_error) = calibration_table(&model_predictions, 10);
    let edge_hit_rate = (edge_positive_total > 0)
        .then(|| edge_positive_hits as f64 / edge_positive_total as f64);
    let edge_miss_rate = edge_hit_rate.map(|hit| 1.0 - hit);

    WeatherCalibrationReport {
        days,
        n_brackets: model_predictions.len() as i64,
        resolved_days: resolved_dates.len() as i64,
        model_brier,
        market_brier,
        brier_advantage,
        model_log_loss: log_loss(&model_predictions),
        market_log_loss: log_loss(&market_predictions),
        edge_hit_rate,
        edge_miss_rate,
        sim_pnl_cents: (sim_pnl_cents * 100.0).round() / 100.0,
        calibration_table: table,
        max_calibration_error,
    }
}

/// Evaluate the live gates. Missing report fields fail their gate.
pub fn check_weather_live_gates(
    report: &WeatherCalibrationReport,
    settings: &Settings,
) -> LiveGates {
    let gates = &settings.weather_live_gate;
    let brier_advantage = report.brier_advantage.unwrap_or(-1.0);
    let max_calibration_error = report.max_calibration_error.unwrap_or(f64::INFINITY);
    LiveGates {
        min_resolved_days: report.resolved_days >= gates.min_resolved_days,
        min_brier_advantage: brier_advantage >= gates.min_brier_advantage,
        min_sim_profit_cents: report.sim_pnl_cents >= gates.min_sim_profit_cents,
        max_calibration_error: max_calibration_error <= gates.max_calibration_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        date: (i32, u32, u32),
        ticker: &str,
        model_prob: f64,
        market_prob: f64,
        result: &str,
    ) -> WeatherBacktestRow {
        WeatherBacktestRow {
            target_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            ticker: ticker.to_string(),
            model_prob,
            market_prob: Some(market_prob),
            result: result.to_string(),
        }
    }

    #[test]
    fn perfect_predictions_have_zero_brier() {
        let rows = vec![
            row((2026, 2, 1), "A", 1.0, 0.5, "yes"),
            row((2026, 2, 1), "B", 0.0, 0.5, "no"),
        ];
        let report = build_report(30, &rows);
        assert_eq!(report.model_brier, Some(0.0));
        assert_eq!(report.resolved_days, 1);
    }

    #[test]
    fn worst_predictions_have_brier_one() {
        let rows = vec![
            row((2026, 2, 2), "A", 1.0, 0.5, "no"),
            row((2026, 2, 2), "B", 0.0, 0.5, "yes"),
        ];
        let report = build_report(30, &rows);
        assert_eq!(report.model_brier, Some(1.0));
    }

    #[test]
    fn calibration_bins_sum_correctly() {
        let rows: Vec<WeatherBacktestRow> = (1..9)
            .map(|i| {
                row(
                    (2026, 2, 3),
                    &format!("T{i}"),
                    i as f64 / 10.0,
                    0.5,
                    if i % 2 == 1 { "yes" } else { "no" },
                )
            })
            .collect();
        let report = build_report(30, &rows);
        assert_eq!(report.n_brackets, 8);
        let total: i64 = report.calibration_table.iter().map(|b| b.count).sum();
        assert_eq!(total, 8);
    }

    #[test]
    fn empty_rows_produce_empty_report() {
        let report = build_report(30, &[]);
        assert_eq!(report.n_brackets, 0);
        assert!(report.model_brier.is_none());
        assert!(report.calibration_table.is_empty());
    }

    #[test]
    fn sim_pnl_trades_only_meaningful_edges() {
        // Edge 0.3 resolving yes at price 50c: +50. Edge 0.01 is below
        // the simulation threshold and ignored.
        let rows = vec![
            row((2026, 2, 4), "A", 0.8, 0.5, "yes"),
            row((2026, 2, 4), "B", 0.51, 0.5, "no"),
        ];
        let report = build_report(30, &rows);
        assert!((report.sim_pnl_cents - 50.0).abs() < 1e-9);
        assert_eq!(report.edge_hit_rate, Some(0.5));
    }

    #[test]
    fn gates_require_every_threshold() {
        let mut settings = Settings::default();
        settings.weather_live_gate.min_resolved_days = 2;
        settings.weather_live_gate.min_brier_advantage = 0.0;
        settings.weather_live_gate.min_sim_profit_cents = 0.0;
        settings.weather_live_gate.max_calibration_error = 0.5;

        let rows = vec![
            row((2026, 2, 1), "A", 0.9, 0.5, "yes"),
            row((2026, 2, 2), "B", 0.1, 0.5, "no"),
        ];
        let report = build_report(30, &rows);
        let gates = check_weather_live_gates(&report, &settings);
        assert!(gates.all_pass());

        settings.weather_live_gate.min_resolved_days = 30;
        let gates = check_weather_live_gates(&report, &settings);
        assert!(!gates.min_resolved_days);
        assert!(!gates.all_pass());

        let empty = build_report(30, &[]);
        let gates = check_weather_live_gates(&empty, &settings);
        assert!(!gates.min_brier_advantage);
        assert!(!gates.max_calibration_error);
    }
}
