//! Bronze stage: cast raw rows into canonical typed rows.
//!
//! Rows that fail a cast or a required-field check are isolated as
//! [`RowValidationError`]s; every other row proceeds.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::errors::RowValidationError;
use crate::models::{Alert, Device, MetricName, RawAlert, RawDevice, RawReading, Reading, Severity};

// ---

pub const READINGS: &str = "readings";
pub const DEVICES: &str = "devices";
pub const ALERTS: &str = "alerts";

const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Output of a normalization pass: valid rows plus rejected-row findings.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub rows: Vec<T>,
    pub rejected: Vec<RowValidationError>,
}

impl<T> Default for Normalized<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

pub fn normalize_readings(raw: &[RawReading]) -> Normalized<Reading> {
    // ---
    let mut out = Normalized::default();
    for (idx, row) in raw.iter().enumerate() {
        let row_id = cast_text(&row.reading_id).unwrap_or_else(|| format!("#{idx}"));
        match normalize_reading(row) {
            Ok(reading) => out.rows.push(reading),
            Err(reason) => out
                .rejected
                .push(RowValidationError::new(READINGS, row_id, reason)),
        }
    }
    out
}

fn normalize_reading(row: &RawReading) -> Result<Reading, String> {
    // ---
    let reading_id = required(cast_text(&row.reading_id), "reading_id")?;
    let device_id = required(cast_text(&row.device_id), "device_id")?;
    let metric_name: MetricName =
        required(cast_category(&row.metric_name), "metric_name")?.parse()?;
    let metric_value = cast_f64(&row.metric_value, "metric_value")?;
    let reading_ts = required(cast_timestamp(&row.reading_ts, "reading_ts")?, "reading_ts")?;
    let ingested_at = required(cast_timestamp(&row.ingested_at, "ingested_at")?, "ingested_at")?;

    Ok(Reading {
        reading_id,
        device_id,
        metric_name,
        metric_value,
        reading_ts,
        ingested_at,
        is_missing_value: metric_value.is_none(),
    })
}

pub fn normalize_devices(raw: &[RawDevice]) -> Normalized<Device> {
    // ---
    let mut out = Normalized::default();
    for (idx, row) in raw.iter().enumerate() {
        let row_id = cast_text(&row.device_id).unwrap_or_else(|| format!("#{idx}"));
        match normalize_device(row) {
            Ok(device) => out.rows.push(device),
            Err(reason) => out
                .rejected
                .push(RowValidationError::new(DEVICES, row_id, reason)),
        }
    }
    out
}

fn normalize_device(row: &RawDevice) -> Result<Device, String> {
    // ---
    Ok(Device {
        device_id: required(cast_text(&row.device_id), "device_id")?,
        device_name: cast_text(&row.device_name),
        device_type: cast_category(&row.device_type),
        location: cast_text(&row.location),
        zone: cast_text(&row.zone),
        manufacturer: cast_text(&row.manufacturer),
        firmware_version: cast_text(&row.firmware_version),
        install_date: cast_date(&row.install_date, "install_date")?,
        is_active: cast_bool(&row.is_active, "is_active")?.unwrap_or(true),
    })
}

pub fn normalize_alerts(raw: &[RawAlert]) -> Normalized<Alert> {
    // ---
    let mut out = Normalized::default();
    for (idx, row) in raw.iter().enumerate() {
        let row_id = cast_text(&row.alert_id).unwrap_or_else(|| format!("#{idx}"));
        match normalize_alert(row) {
            Ok(alert) => out.rows.push(alert),
            Err(reason) => out
                .rejected
                .push(RowValidationError::new(ALERTS, row_id, reason)),
        }
    }
    out
}

fn normalize_alert(row: &RawAlert) -> Result<Alert, String> {
    // ---
    let alert_ts = required(cast_timestamp(&row.alert_ts, "alert_ts")?, "alert_ts")?;
    let resolved_at = cast_timestamp(&row.resolved_at, "resolved_at")?;
    if let Some(resolved) = resolved_at {
        if resolved < alert_ts {
            return Err(format!(
                "resolved_at {} precedes alert_ts {}",
                resolved.to_rfc3339(),
                alert_ts.to_rfc3339()
            ));
        }
    }

    let metric_name = match cast_category(&row.metric_name) {
        Some(name) => Some(name.parse::<MetricName>()?),
        None => None,
    };

    Ok(Alert {
        alert_id: required(cast_text(&row.alert_id), "alert_id")?,
        device_id: required(cast_text(&row.device_id), "device_id")?,
        alert_type: cast_category(&row.alert_type),
        severity: required(cast_category(&row.severity), "severity")?.parse::<Severity>()?,
        metric_name,
        threshold_value: cast_f64(&row.threshold_value, "threshold_value")?,
        actual_value: cast_f64(&row.actual_value, "actual_value")?,
        alert_ts,
        resolved_at,
    })
}

// ---

fn required<T>(value: Option<T>, field: &str) -> Result<T, String> {
    value.ok_or_else(|| format!("{field} is required"))
}

/// Trimmed text; empty strings and nulls become `None`.
fn cast_text(value: &Option<Value>) -> Option<String> {
    // ---
    let text = match value.as_ref()? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Trimmed, lower-cased categorical text.
fn cast_category(value: &Option<Value>) -> Option<String> {
    cast_text(value).map(|s| s.to_lowercase())
}

fn cast_f64(value: &Option<Value>, field: &str) -> Result<Option<f64>, String> {
    // ---
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(format!("{field} '{s}' is not numeric")),
        },
        Some(other) => Err(format!("{field} {other} is not numeric")),
    }
}

fn cast_timestamp(value: &Option<Value>, field: &str) -> Result<Option<DateTime<Utc>>, String> {
    // ---
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_timestamp(s.trim())
            .map(Some)
            .ok_or_else(|| format!("{field} '{s}' is not a timestamp")),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(Some)
            .ok_or_else(|| format!("{field} {n} is not an epoch timestamp")),
        Some(other) => Err(format!("{field} {other} is not a timestamp")),
    }
}

/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS` interpreted as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    // ---
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn cast_date(value: &Option<Value>, field: &str) -> Result<Option<NaiveDate>, String> {
    // ---
    match cast_text(value) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| format!("{field} '{s}' is not a date")),
    }
}

fn cast_bool(value: &Option<Value>, field: &str) -> Result<Option<bool>, String> {
    // ---
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => match cast_category(&Some(other.clone())).as_deref() {
            None => Ok(None),
            Some("true" | "1" | "yes" | "y" | "t") => Ok(Some(true)),
            Some("false" | "0" | "no" | "n" | "f") => Ok(Some(false)),
            Some(s) => Err(format!("{field} '{s}' is not a boolean")),
        },
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn create_raw_reading(id: &str, value: Value) -> RawReading {
        // ---
        RawReading {
            reading_id: Some(json!(id)),
            device_id: Some(json!(" DEV001 ")),
            metric_name: Some(json!(" Temperature ")),
            metric_value: Some(value),
            reading_ts: Some(json!("2024-01-01 08:15:00")),
            ingested_at: Some(json!("2024-01-01T08:16:00Z")),
        }
    }

    #[test]
    fn test_reading_casts_and_cleans() {
        // ---
        let out = normalize_readings(&[create_raw_reading("R001", json!("72.5"))]);
        assert!(out.rejected.is_empty());

        let r = &out.rows[0];
        assert_eq!(r.device_id, "DEV001");
        assert_eq!(r.metric_name, MetricName::Temperature);
        assert_eq!(r.metric_value, Some(72.5));
        assert_eq!(r.reading_ts, Utc.with_ymd_and_hms(2024, 1, 1, 8, 15, 0).unwrap());
        assert!(!r.is_missing_value);
    }

    #[test]
    fn test_null_value_marks_missing() {
        // ---
        let out = normalize_readings(&[
            create_raw_reading("R001", Value::Null),
            create_raw_reading("R002", json!("  ")),
        ]);
        assert!(out.rejected.is_empty());
        assert!(out.rows.iter().all(|r| r.is_missing_value && r.metric_value.is_none()));
    }

    #[test]
    fn test_invalid_rows_are_isolated() {
        // ---
        let mut bad_metric = create_raw_reading("R003", json!(1.0));
        bad_metric.metric_name = Some(json!("voltage"));
        let mut no_ts = create_raw_reading("R004", json!(1.0));
        no_ts.reading_ts = None;

        let out = normalize_readings(&[
            create_raw_reading("R001", json!(20.0)),
            create_raw_reading("R002", json!("abc")),
            bad_metric,
            no_ts,
        ]);

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].reading_id, "R001");
        let ids: Vec<&str> = out.rejected.iter().map(|e| e.row_id.as_str()).collect();
        assert_eq!(ids, vec!["R002", "R003", "R004"]);
        assert_eq!(out.rejected[0].reason, "metric_value 'abc' is not numeric");
        assert_eq!(out.rejected[2].reason, "reading_ts is required");
    }

    #[test]
    fn test_missing_id_uses_input_index() {
        // ---
        let mut row = create_raw_reading("R001", json!(1.0));
        row.reading_id = None;
        let out = normalize_readings(&[row]);
        assert_eq!(out.rejected[0].row_id, "#0");
    }

    #[test]
    fn test_device_defaults_and_casts() {
        // ---
        let raw = RawDevice {
            device_id: Some(json!("DEV004")),
            device_type: Some(json!(" Vibration_Sensor ")),
            location: Some(json!("Detroit")),
            install_date: Some(json!("2023-06-15")),
            is_active: Some(json!("FALSE")),
            ..Default::default()
        };
        let out = normalize_devices(&[raw, RawDevice::default()]);

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rejected.len(), 1);
        let d = &out.rows[0];
        assert_eq!(d.device_type.as_deref(), Some("vibration_sensor"));
        assert_eq!(d.install_date, NaiveDate::from_ymd_opt(2023, 6, 15));
        assert!(!d.is_active);
    }

    #[test]
    fn test_alert_resolution_before_raise_is_rejected() {
        // ---
        let raw = RawAlert {
            alert_id: Some(json!("A001")),
            device_id: Some(json!("DEV001")),
            severity: Some(json!("Critical")),
            alert_ts: Some(json!("2024-01-01T10:00:00Z")),
            resolved_at: Some(json!("2024-01-01T09:00:00Z")),
            ..Default::default()
        };
        let out = normalize_alerts(&[raw]);
        assert!(out.rows.is_empty());
        assert!(out.rejected[0].reason.contains("precedes alert_ts"));
    }

    #[test]
    fn test_alert_categories_lowercased() {
        // ---
        let raw = RawAlert {
            alert_id: Some(json!("A002")),
            device_id: Some(json!("DEV002")),
            alert_type: Some(json!(" THRESHOLD_BREACH ")),
            severity: Some(json!("WARNING")),
            metric_name: Some(json!("Humidity")),
            threshold_value: Some(json!("80")),
            actual_value: Some(json!(84.5)),
            alert_ts: Some(json!(1704103200)),
            ..Default::default()
        };
        let out = normalize_alerts(&[raw]);
        let a = &out.rows[0];
        assert_eq!(a.alert_type.as_deref(), Some("threshold_breach"));
        assert_eq!(a.severity, Severity::Warning);
        assert_eq!(a.metric_name, Some(MetricName::Humidity));
        assert_eq!(a.threshold_value, Some(80.0));
        assert_eq!(a.alert_ts, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    }
}
