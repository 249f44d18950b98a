//! Error and finding types for the transformation pipeline.
//!
//! `ConfigError` stops the service at startup, before any run. Fatal run kinds
//! (`SchemaConflictError`, quality gate failures, `StoreError`) abort a run and
//! are wrapped by [`PipelineError`]. Row-level validation errors and integrity
//! warnings are collected into the run report alongside the rows that did
//! succeed.

use serde::Serialize;
use thiserror::Error;

// ---

/// Malformed anomaly threshold configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("metric '{0}' has no threshold bounds configured")]
    MissingMetric(String),
    #[error("metric '{metric}' requires an upper bound")]
    MissingUpperBound { metric: String },
    #[error("metric '{metric}' has a negative {bound} bound: {value}")]
    NegativeBound {
        metric: String,
        bound: &'static str,
        value: f64,
    },
    #[error("metric '{metric}' has a non-finite {bound} bound")]
    NonFiniteBound { metric: String, bound: &'static str },
    #[error("metric '{metric}' has inverted bounds: lower {lower} > upper {upper}")]
    InvertedBounds {
        metric: String,
        lower: f64,
        upper: f64,
    },
    #[error("unknown metric '{0}' in threshold configuration")]
    UnknownMetric(String),
}

/// A single input row that failed casting or a required-field check.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{dataset} row {row_id}: {reason}")]
pub struct RowValidationError {
    pub dataset: String,
    /// Natural key when it could be read, otherwise `#<input index>`.
    pub row_id: String,
    pub reason: String,
}

impl RowValidationError {
    pub fn new(dataset: &str, row_id: impl Into<String>, reason: impl Into<String>) -> Self {
        // ---
        Self {
            dataset: dataset.to_string(),
            row_id: row_id.into(),
            reason: reason.into(),
        }
    }
}

/// Incompatible field types met while merging rows into persisted state.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("schema conflict on field '{field}': existing {existing}, incoming {incoming}")]
pub struct SchemaConflictError {
    pub field: String,
    pub existing: &'static str,
    pub incoming: &'static str,
}

/// A record that references a device absent from the device set.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("orphan {dataset} record {record_id}: unknown device_id '{device_id}'")]
pub struct IntegrityWarning {
    pub dataset: String,
    pub record_id: String,
    pub device_id: String,
}

/// One failed silver-layer data test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityFailure {
    pub check: String,
    pub dataset: String,
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("row serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Run-level failure. Nothing is persisted when a run returns one of these.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    SchemaConflict(#[from] SchemaConflictError),
    #[error("quality gate failed with {} failing check(s)", .0.len())]
    QualityGate(Vec<QualityFailure>),
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
    #[error("row serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_row_validation_display() {
        // ---
        let err = RowValidationError::new("readings", "R001", "metric_value 'abc' is not numeric");
        assert_eq!(
            err.to_string(),
            "readings row R001: metric_value 'abc' is not numeric"
        );
    }

    #[test]
    fn test_schema_conflict_is_transparent() {
        // ---
        let err: PipelineError = SchemaConflictError {
            field: "metric_value".into(),
            existing: "number",
            incoming: "string",
        }
        .into();
        assert_eq!(
            err.to_string(),
            "schema conflict on field 'metric_value': existing number, incoming string"
        );
    }

    #[test]
    fn test_quality_gate_counts_failures() {
        // ---
        let failure = QualityFailure {
            check: "unique".into(),
            dataset: "int_sensor_readings_cleaned".into(),
            detail: "reading_id R001 appears 2 times".into(),
        };
        let err = PipelineError::QualityGate(vec![failure.clone(), failure]);
        assert_eq!(err.to_string(), "quality gate failed with 2 failing check(s)");
    }
}
