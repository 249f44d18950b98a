//! Silver-layer data tests and referential integrity findings.
//!
//! `check_silver` failures block the gold build; orphan records are only
//! reported.

use std::collections::{BTreeMap, HashSet};

use crate::errors::{IntegrityWarning, QualityFailure};
use crate::models::CleanedReading;
use crate::pipeline::gold::{DimDevice, EnrichedAlert};
use crate::pipeline::{ALERTS_DATASET, READINGS_DATASET};

// ---

pub fn check_silver(readings: &[CleanedReading], alerts: &[EnrichedAlert]) -> Vec<QualityFailure> {
    // ---
    let mut failures = Vec::new();

    failures.extend(unique(
        READINGS_DATASET,
        "reading_id",
        readings.iter().map(|r| r.reading_id.as_str()),
    ));
    failures.extend(unique(ALERTS_DATASET, "alert_id", alerts.iter().map(|a| a.alert_id.as_str())));

    for r in readings.iter().filter(|r| r.device_id.trim().is_empty()) {
        failures.push(QualityFailure {
            check: "not_null".into(),
            dataset: READINGS_DATASET.into(),
            detail: format!("reading {} has no device_id", r.reading_id),
        });
    }

    for a in alerts {
        if a.device_id.trim().is_empty() {
            failures.push(QualityFailure {
                check: "not_null".into(),
                dataset: ALERTS_DATASET.into(),
                detail: format!("alert {} has no device_id", a.alert_id),
            });
        }
        if let Some(resolved) = a.resolved_at {
            if resolved < a.alert_ts {
                failures.push(QualityFailure {
                    check: "resolved_after_raised".into(),
                    dataset: ALERTS_DATASET.into(),
                    detail: format!("alert {} resolved before it was raised", a.alert_id),
                });
            }
        }
    }

    failures
}

fn unique<'a>(
    dataset: &str,
    column: &str,
    values: impl Iterator<Item = &'a str>,
) -> Vec<QualityFailure> {
    // ---
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(v, n)| QualityFailure {
            check: "unique".into(),
            dataset: dataset.into(),
            detail: format!("{column} {v} appears {n} times"),
        })
        .collect()
}

/// Alerts and readings whose `device_id` is not in `devices`.
pub fn orphan_records(
    readings: &[CleanedReading],
    alerts: &[EnrichedAlert],
    devices: &[DimDevice],
) -> Vec<IntegrityWarning> {
    // ---
    let known: HashSet<&str> = devices.iter().map(|d| d.device_id.as_str()).collect();

    let orphan_alerts = alerts
        .iter()
        .filter(|a| !known.contains(a.device_id.as_str()))
        .map(|a| IntegrityWarning {
            dataset: ALERTS_DATASET.into(),
            record_id: a.alert_id.clone(),
            device_id: a.device_id.clone(),
        });
    let orphan_readings = readings
        .iter()
        .filter(|r| !known.contains(r.device_id.as_str()))
        .map(|r| IntegrityWarning {
            dataset: READINGS_DATASET.into(),
            record_id: r.reading_id.clone(),
            device_id: r.device_id.clone(),
        });

    orphan_alerts.chain(orphan_readings).collect()
}
