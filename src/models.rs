//! Data models for the medallion pipeline.
//!
//! `Raw*` types are the bronze shape: every field is whatever the ingestion
//! source delivered (string, number, bool or null). The typed counterparts are
//! produced by `pipeline::normalize`.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---

/// Sensor metric kinds accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricName {
    Temperature,
    Vibration,
    Humidity,
    Pressure,
}

impl MetricName {
    pub const ALL: [MetricName; 4] = [
        MetricName::Temperature,
        MetricName::Vibration,
        MetricName::Humidity,
        MetricName::Pressure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Vibration => "vibration",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
        }
    }
}

impl FromStr for MetricName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "temperature" => Ok(Self::Temperature),
            "vibration" => Ok(Self::Vibration),
            "humidity" => Ok(Self::Humidity),
            "pressure" => Ok(Self::Pressure),
            other => Err(format!("unknown metric_name '{other}'")),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "warning" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

// ---

/// Raw sensor reading as delivered by ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawReading {
    pub reading_id: Option<Value>,
    pub device_id: Option<Value>,
    pub metric_name: Option<Value>,
    pub metric_value: Option<Value>,
    pub reading_ts: Option<Value>,
    pub ingested_at: Option<Value>,
}

/// Raw device reference row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDevice {
    pub device_id: Option<Value>,
    pub device_name: Option<Value>,
    pub device_type: Option<Value>,
    pub location: Option<Value>,
    pub zone: Option<Value>,
    pub manufacturer: Option<Value>,
    pub firmware_version: Option<Value>,
    pub install_date: Option<Value>,
    pub is_active: Option<Value>,
}

/// Raw alert row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawAlert {
    pub alert_id: Option<Value>,
    pub device_id: Option<Value>,
    pub alert_type: Option<Value>,
    pub severity: Option<Value>,
    pub metric_name: Option<Value>,
    pub threshold_value: Option<Value>,
    pub actual_value: Option<Value>,
    pub alert_ts: Option<Value>,
    pub resolved_at: Option<Value>,
}

// ---

/// Typed reading after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub reading_id: String,
    pub device_id: String,
    pub metric_name: MetricName,
    pub metric_value: Option<f64>,
    pub reading_ts: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub is_missing_value: bool,
}

/// Silver-layer reading: deduplicated and classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedReading {
    pub reading_id: String,
    pub device_id: String,
    pub metric_name: MetricName,
    pub metric_value: Option<f64>,
    pub reading_ts: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_missing_value: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_anomaly: bool,
}

impl CleanedReading {
    pub fn from_reading(reading: Reading, is_anomaly: bool) -> Self {
        // ---
        Self {
            reading_id: reading.reading_id,
            device_id: reading.device_id,
            metric_name: reading.metric_name,
            metric_value: reading.metric_value,
            reading_ts: reading.reading_ts,
            ingested_at: reading.ingested_at,
            is_missing_value: reading.is_missing_value,
            is_anomaly,
        }
    }
}

/// Persisted rows may carry `null` for a flag column added after they were
/// written.
fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub device_id: String,
    pub alert_type: Option<String>,
    pub severity: Severity,
    pub metric_name: Option<MetricName>,
    pub threshold_value: Option<f64>,
    pub actual_value: Option<f64>,
    pub alert_ts: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Whole minutes between raising and resolving the alert.
    pub fn minutes_to_resolve(&self) -> Option<i64> {
        self.resolved_at
            .map(|resolved| (resolved - self.alert_ts).num_minutes())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_alert(resolved_at: Option<DateTime<Utc>>) -> Alert {
        // ---
        Alert {
            alert_id: "A001".to_string(),
            device_id: "DEV001".to_string(),
            alert_type: Some("threshold_breach".to_string()),
            severity: Severity::Critical,
            metric_name: Some(MetricName::Temperature),
            threshold_value: Some(85.0),
            actual_value: Some(91.2),
            alert_ts: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
            resolved_at,
        }
    }

    #[test]
    fn test_metric_name_parsing() {
        // ---
        assert_eq!(" Temperature ".parse::<MetricName>(), Ok(MetricName::Temperature));
        assert_eq!("VIBRATION".parse::<MetricName>(), Ok(MetricName::Vibration));
        assert!("voltage".parse::<MetricName>().is_err());
    }

    #[test]
    fn test_metric_name_serializes_lowercase() {
        // ---
        let json = serde_json::to_string(&MetricName::Pressure).unwrap();
        assert_eq!(json, "\"pressure\"");
    }

    #[test]
    fn test_cleaned_reading_tolerates_null_flags() {
        // ---
        let row = serde_json::json!({
            "reading_id": "R1", "device_id": "DEV001", "metric_name": "humidity",
            "metric_value": null, "reading_ts": "2024-01-01T08:00:00Z",
            "ingested_at": "2024-01-01T08:00:00Z", "is_missing_value": true, "is_anomaly": null
        });
        let reading: CleanedReading = serde_json::from_value(row).unwrap();
        assert!(reading.is_missing_value);
        assert!(!reading.is_anomaly);
    }

    #[test]
    fn test_alert_resolution() {
        // ---
        let open = create_test_alert(None);
        assert!(!open.is_resolved());
        assert_eq!(open.minutes_to_resolve(), None);

        let resolved = create_test_alert(Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap()));
        assert!(resolved.is_resolved());
        assert_eq!(resolved.minutes_to_resolve(), Some(90));
    }
}
