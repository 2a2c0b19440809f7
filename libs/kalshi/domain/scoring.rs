//! Probability scoring primitives shared by the store's accuracy queries
//! and the calibration reports.

use serde::Serialize;

/// Single clamp constant for log-loss everywhere. The store and the
/// in-memory report must agree on boundary mass.
pub const PROB_CLAMP_EPSILON: f64 = 1e-6;

pub fn clamp_probability(value: f64) -> f64 {
    value.clamp(PROB_CLAMP_EPSILON, 1.0 - PROB_CLAMP_EPSILON)
}

/// Mean squared error of probabilities against binary outcomes.
pub fn brier_score(predictions: &[(f64, i64)]) -> Option<f64> {
    if predictions.is_empty() {
        return None;
    }
    let total: f64 = predictions
        .iter()
        .map(|(probability, outcome)| {
            let p = probability.clamp(0.0, 1.0);
            let y = if *outcome != 0 { 1.0 } else { 0.0 };
            (p - y) * (p - y)
        })
        .sum();
    Some(total / predictions.len() as f64)
}

/// Mean negative log-likelihood with clamped probabilities.
pub fn log_loss(predictions: &[(f64, i64)]) -> Option<f64> {
    if predictions.is_empty() {
        return None;
    }
    let total: f64 = predictions
        .iter()
        .map(|(probability, outcome)| {
            let p = clamp_probability(*probability);
            if *outcome != 0 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    Some(total / predictions.len() as f64)
}

/// One bucket of an equal-width calibration table
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationBucket {
    /// 1-indexed bucket number
    pub bucket: i64,
    pub count: i64,
    pub avg_predicted: f64,
    pub actual_rate: f64,
    pub abs_error: f64,
}

/// Bucket predictions into `bins` equal-width probability bands. Empty
/// buckets are omitted. Returns the table and the largest absolute
/// calibration error across populated buckets.
pub fn calibration_table(
    predictions: &[(f64, i64)],
    bins: usize,
) -> (Vec<CalibrationBucket>, Option<f64>) {
    if predictions.is_empty() || bins == 0 {
        return (Vec::new(), None);
    }
    let mut buckets: Vec<Vec<(f64, i64)>> = vec![Vec::new(); bins];
    for (probability, outcome) in predictions {
        let p = probability.clamp(0.0, 1.0);
        let idx = ((p * bins as f64) as usize).min(bins - 1);
        buckets[idx].push((p, *outcome));
    }
    let mut output = Vec::new();
    let mut max_error: Option<f64> = None;
    for (idx, bucket) in buckets.iter().enumerate() {
        if bucket.is_empty() {
            continue;
        }
        let count = bucket.len() as f64;
        let avg_predicted = bucket.iter().map(|(p, _)| p).sum::<f64>() / count;
        let actual_rate = bucket
            .iter()
            .map(|(_, y)| if *y != 0 { 1.0 } else { 0.0 })
            .sum::<f64>()
            / count;
        let error = (avg_predicted - actual_rate).abs();
        max_error = Some(max_error.map_or(error, |current: f64| current.max(error)));
        output.push(CalibrationBucket {
            bucket: idx as i64 + 1,
            count: bucket.len() as i64,
            avg_predicted,
            actual_rate,
            abs_error: error,
        });
    }
    (output, max_error)
}

/// Pearson correlation, used for the edge-reliability metric.
pub fn pearson_correlation(pairs: &[(f64, f64)]) -> Option<f64> {
    let n = pairs.len() as f64;
    if pairs.len() < 2 {
        return None;
    }
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in pairs {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x) * (x - mean_x);
        var_y += (y - mean_y) * (y - mean_y);
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}
