//! Gold-layer models: device dimension, enriched alerts, per-device health
//! summary and per-location roll-up.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Alert, CleanedReading, Device, MetricName, Severity};
use crate::pipeline::aggregate::{mean, rate_pct, round_to};
use crate::pipeline::health::{self, HealthCategory};
use crate::pipeline::surrogate::surrogate_key;

// ---

const UNKNOWN_LOCATION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimDevice {
    pub device_key: String,
    pub device_id: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub location: Option<String>,
    pub zone: Option<String>,
    pub manufacturer: Option<String>,
    pub firmware_version: Option<String>,
    pub install_date: Option<NaiveDate>,
    pub is_active: bool,
}

impl From<Device> for DimDevice {
    fn from(d: Device) -> Self {
        // ---
        Self {
            device_key: surrogate_key([d.device_id.as_str()]),
            device_id: d.device_id,
            device_name: d.device_name,
            device_type: d.device_type,
            location: d.location,
            zone: d.zone,
            manufacturer: d.manufacturer,
            firmware_version: d.firmware_version,
            install_date: d.install_date,
            is_active: d.is_active,
        }
    }
}

/// Alert with derived resolution fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedAlert {
    pub alert_key: String,
    pub alert_id: String,
    pub device_id: String,
    pub alert_type: Option<String>,
    pub severity: Severity,
    pub metric_name: Option<MetricName>,
    pub threshold_value: Option<f64>,
    pub actual_value: Option<f64>,
    pub alert_ts: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub is_resolved: bool,
    pub minutes_to_resolve: Option<i64>,
}

impl From<Alert> for EnrichedAlert {
    fn from(a: Alert) -> Self {
        // ---
        Self {
            alert_key: surrogate_key([a.alert_id.as_str()]),
            is_resolved: a.is_resolved(),
            minutes_to_resolve: a.minutes_to_resolve(),
            alert_id: a.alert_id,
            device_id: a.device_id,
            alert_type: a.alert_type,
            severity: a.severity,
            metric_name: a.metric_name,
            threshold_value: a.threshold_value,
            actual_value: a.actual_value,
            alert_ts: a.alert_ts,
            resolved_at: a.resolved_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_key: String,
    pub device_id: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub location: Option<String>,
    pub total_readings: u64,
    pub anomaly_count: u64,
    pub missing_count: u64,
    pub anomaly_rate_pct: f64,
    pub completeness_pct: f64,
    pub critical_alerts: u32,
    pub warning_alerts: u32,
    pub open_alerts: u32,
    pub avg_minutes_to_resolve: Option<f64>,
    pub health_score: u8,
    pub health_category: HealthCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationHealth {
    pub location: String,
    pub device_count: u64,
    pub avg_health_score: Option<f64>,
    pub critical_devices: u64,
}

#[derive(Default)]
struct ReadingTally {
    total: u64,
    anomalies: u64,
    missing: u64,
}

#[derive(Default)]
struct AlertTally {
    critical: u32,
    warning: u32,
    open: u32,
    resolve_minutes: Vec<f64>,
}

/// One summary row per device in `devices`, in device order.
///
/// A device without readings has an anomaly rate of 0 and completeness of 0.
pub fn device_summaries(
    devices: &[DimDevice],
    readings: &[CleanedReading],
    alerts: &[EnrichedAlert],
) -> Vec<DeviceSummary> {
    // ---
    let mut reading_tally: HashMap<&str, ReadingTally> = HashMap::new();
    for r in readings {
        let t = reading_tally.entry(r.device_id.as_str()).or_default();
        t.total += 1;
        t.anomalies += u64::from(r.is_anomaly);
        t.missing += u64::from(r.is_missing_value);
    }

    let mut alert_tally: HashMap<&str, AlertTally> = HashMap::new();
    for a in alerts {
        let t = alert_tally.entry(a.device_id.as_str()).or_default();
        match a.severity {
            Severity::Critical => t.critical += 1,
            Severity::Warning => t.warning += 1,
            Severity::Info => {}
        }
        if !a.is_resolved {
            t.open += 1;
        }
        if let Some(minutes) = a.minutes_to_resolve {
            t.resolve_minutes.push(minutes as f64);
        }
    }

    devices
        .iter()
        .map(|d| {
            let r = reading_tally.get(d.device_id.as_str());
            let a = alert_tally.get(d.device_id.as_str());

            let total = r.map_or(0, |t| t.total);
            let anomalies = r.map_or(0, |t| t.anomalies);
            let missing = r.map_or(0, |t| t.missing);
            let anomaly_rate_pct = rate_pct(anomalies, total).unwrap_or(0.0);
            let completeness_pct = rate_pct(total - missing, total).unwrap_or(0.0);
            let critical = a.map_or(0, |t| t.critical);
            let warning = a.map_or(0, |t| t.warning);

            DeviceSummary {
                device_key: d.device_key.clone(),
                device_id: d.device_id.clone(),
                device_name: d.device_name.clone(),
                device_type: d.device_type.clone(),
                location: d.location.clone(),
                total_readings: total,
                anomaly_count: anomalies,
                missing_count: missing,
                anomaly_rate_pct,
                completeness_pct,
                critical_alerts: critical,
                warning_alerts: warning,
                open_alerts: a.map_or(0, |t| t.open),
                avg_minutes_to_resolve: a
                    .and_then(|t| mean(&t.resolve_minutes))
                    .map(|m| round_to(m, 1)),
                health_score: health::score(critical, warning, anomaly_rate_pct, completeness_pct),
                health_category: health::category(critical, anomaly_rate_pct),
            }
        })
        .collect()
}

/// Roll device summaries up by location; devices without one group under
/// `"unknown"`. Ordered by location name.
pub fn location_health(summaries: &[DeviceSummary]) -> Vec<LocationHealth> {
    // ---
    let mut groups: BTreeMap<&str, Vec<&DeviceSummary>> = BTreeMap::new();
    for s in summaries {
        groups
            .entry(s.location.as_deref().unwrap_or(UNKNOWN_LOCATION))
            .or_default()
            .push(s);
    }

    groups
        .into_iter()
        .map(|(location, members)| {
            let scores: Vec<f64> = members.iter().map(|s| f64::from(s.health_score)).collect();
            LocationHealth {
                location: location.to_string(),
                device_count: members.len() as u64,
                avg_health_score: mean(&scores).map(|m| round_to(m, 1)),
                critical_devices: members
                    .iter()
                    .filter(|s| s.health_category == HealthCategory::Critical)
                    .count() as u64,
            }
        })
        .collect()
}
