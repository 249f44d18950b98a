//! Fixed-grain roll-ups of cleaned readings.
//!
//! Standard deviation is the sample (Bessel-corrected) form, matching SQL
//! `STDDEV`; it is `None` for fewer than two values.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CleanedReading, MetricName};
use crate::pipeline::surrogate::surrogate_key;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grain {
    Hour,
    Day,
}

impl Grain {
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        // ---
        let step = match self {
            Self::Hour => Duration::hours(1),
            Self::Day => Duration::days(1),
        };
        ts.duration_trunc(step).unwrap_or(ts)
    }
}

/// Identity of an aggregate bucket.
pub type BucketKey = (String, MetricName, DateTime<Utc>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub metric_key: String,
    pub device_id: String,
    pub metric_name: MetricName,
    pub grain: Grain,
    pub time_bucket: DateTime<Utc>,
    pub reading_count: u64,
    pub missing_count: u64,
    pub avg_value: Option<f64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub stddev_value: Option<f64>,
    pub anomaly_count: u64,
    pub anomaly_rate_pct: Option<f64>,
}

pub fn bucket_key(reading: &CleanedReading, grain: Grain) -> BucketKey {
    (
        reading.device_id.clone(),
        reading.metric_name,
        grain.truncate(reading.reading_ts),
    )
}

/// Surrogate key of a bucket row.
pub fn bucket_metric_key(
    device_id: &str,
    metric_name: MetricName,
    time_bucket: &DateTime<Utc>,
) -> String {
    surrogate_key([device_id, metric_name.as_str(), time_bucket.to_rfc3339().as_str()])
}

/// Distinct buckets the given readings fall into.
pub fn touched_buckets(readings: &[CleanedReading], grain: Grain) -> BTreeSet<BucketKey> {
    readings.iter().map(|r| bucket_key(r, grain)).collect()
}

/// Group readings by (device, metric, truncated time) and compute stats.
/// Output is ordered by bucket key.
pub fn aggregate(readings: &[CleanedReading], grain: Grain) -> Vec<AggregateBucket> {
    // ---
    let mut groups: BTreeMap<BucketKey, Vec<&CleanedReading>> = BTreeMap::new();
    for reading in readings {
        groups.entry(bucket_key(reading, grain)).or_default().push(reading);
    }

    groups
        .into_iter()
        .map(|((device_id, metric_name, time_bucket), members)| {
            let values: Vec<f64> = members.iter().filter_map(|r| r.metric_value).collect();
            let reading_count = members.len() as u64;
            let anomaly_count = members.iter().filter(|r| r.is_anomaly).count() as u64;
            let missing_count = members.iter().filter(|r| r.is_missing_value).count() as u64;

            AggregateBucket {
                metric_key: bucket_metric_key(&device_id, metric_name, &time_bucket),
                device_id,
                metric_name,
                grain,
                time_bucket,
                reading_count,
                missing_count,
                avg_value: mean(&values),
                min_value: values.iter().copied().reduce(f64::min),
                max_value: values.iter().copied().reduce(f64::max),
                stddev_value: sample_stddev(&values),
                anomaly_count,
                anomaly_rate_pct: rate_pct(anomaly_count, reading_count),
            }
        })
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    // ---
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn sample_stddev(values: &[f64]) -> Option<f64> {
    // ---
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// `round(part * 100 / whole, 1)`; `None` when `whole` is zero.
pub fn rate_pct(part: u64, whole: u64) -> Option<f64> {
    // ---
    if whole == 0 {
        return None;
    }
    Some(round_to(part as f64 * 100.0 / whole as f64, 1))
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
