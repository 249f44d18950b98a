//! Threshold-based anomaly classification.

use crate::models::{CleanedReading, MetricName, Reading};
use crate::pipeline::thresholds::AnomalyThresholds;

// ---

/// True when `value` falls strictly outside the metric's configured bounds.
///
/// A missing value is never an anomaly; it is tracked separately through
/// `is_missing_value`.
pub fn classify(metric: MetricName, value: Option<f64>, thresholds: &AnomalyThresholds) -> bool {
    // ---
    let (Some(value), Some(bounds)) = (value, thresholds.get(metric)) else {
        return false;
    };
    let above = bounds.upper.is_some_and(|upper| value > upper);
    let below = bounds.lower.is_some_and(|lower| value < lower);
    above || below
}

pub fn classify_readings(
    readings: Vec<Reading>,
    thresholds: &AnomalyThresholds,
) -> Vec<CleanedReading> {
    // ---
    readings
        .into_iter()
        .map(|r| {
            let is_anomaly = classify(r.metric_name, r.metric_value, thresholds);
            CleanedReading::from_reading(r, is_anomaly)
        })
        .collect()
}
