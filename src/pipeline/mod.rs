//! Bronze → Silver → Gold transformation pipeline.
//!
//! Each stage is a plain function over the previous stage's output and the
//! stages are composed explicitly in [`plan_run`]. Only [`run_pipeline`]
//! touches the state store: it reads prior state once at the start and
//! commits every dataset write and the checkpoint once at the end, so a run
//! that fails at any stage leaves persisted state as it was.
//!
//! At most one run per store is expected at a time; the HTTP layer holds a
//! run lock, and scheduling across processes is the caller's concern.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{IntegrityWarning, PipelineError, RowValidationError, StoreError};
use crate::models::{CleanedReading, RawAlert, RawDevice, RawReading};
use crate::store::{CheckpointUpdate, DatasetWrite, StateStore};

pub mod aggregate;
pub mod classify;
pub mod dedup;
pub mod gold;
pub mod health;
pub mod incremental;
pub mod normalize;
pub mod quality;
pub mod surrogate;
pub mod thresholds;

use aggregate::{aggregate, bucket_key, bucket_metric_key, touched_buckets, Grain};
use gold::{device_summaries, location_health, DimDevice, EnrichedAlert};
use incremental::{from_rows, merge, merge_incremental, select_new_source, to_rows, Row, RunMode};
use thresholds::AnomalyThresholds;

// ---

pub const READINGS_DATASET: &str = "int_sensor_readings_cleaned";
pub const ALERTS_DATASET: &str = "int_alerts_enriched";
pub const DEVICES_DATASET: &str = "dim_devices";
pub const HOURLY_DATASET: &str = "fct_hourly_metrics";
pub const DAILY_DATASET: &str = "fct_daily_metrics";
pub const SUMMARY_DATASET: &str = "fct_device_summary";
pub const LOCATION_DATASET: &str = "agg_location_health";

pub const DEFAULT_FULL_REFRESH_ANOMALY_LIMIT: usize = 50;

/// Raw input for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineBatch {
    #[serde(default)]
    pub readings: Vec<RawReading>,
    #[serde(default)]
    pub devices: Vec<RawDevice>,
    #[serde(default)]
    pub alerts: Vec<RawAlert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Gold is rebuilt in full when anomalies across silver exceed this.
    pub full_refresh_anomaly_limit: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Incremental,
            full_refresh_anomaly_limit: DEFAULT_FULL_REFRESH_ANOMALY_LIMIT,
        }
    }
}

/// Persisted state a run builds on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorState {
    pub checkpoint: Option<DateTime<Utc>>,
    pub readings: Vec<Row>,
    pub alerts: Vec<Row>,
    pub devices: Vec<Row>,
    pub hourly: Vec<Row>,
    pub daily: Vec<Row>,
}

impl PriorState {
    /// Read the checkpoint and the merge targets, once per run.
    pub async fn load<S: StateStore>(store: &S) -> Result<Self, StoreError> {
        // ---
        Ok(Self {
            checkpoint: store.checkpoint(READINGS_DATASET).await?,
            readings: store.load_rows(READINGS_DATASET).await?,
            alerts: store.load_rows(ALERTS_DATASET).await?,
            devices: store.load_rows(DEVICES_DATASET).await?,
            hourly: store.load_rows(HOURLY_DATASET).await?,
            daily: store.load_rows(DAILY_DATASET).await?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStat {
    pub dataset: String,
    pub rows: usize,
}

/// Structured outcome of a run, returned to the caller and recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub silver_mode: RunMode,
    pub gold_mode: RunMode,
    pub checkpoint_before: Option<DateTime<Utc>>,
    pub checkpoint_after: Option<DateTime<Utc>>,
    pub source_rows: usize,
    pub new_source_rows: usize,
    pub deduplicated_rows: usize,
    pub anomaly_count: usize,
    /// Anomalous rows across the whole merged silver set.
    pub silver_anomaly_count: usize,
    pub missing_value_count: usize,
    pub readings_inserted: usize,
    pub readings_updated: usize,
    pub added_columns: Vec<String>,
    pub rejected: Vec<RowValidationError>,
    pub warnings: Vec<IntegrityWarning>,
    pub datasets: Vec<DatasetStat>,
}

#[cfg(test)]
impl RunReport {
    pub fn empty() -> Self {
        Self {
            run_id: Uuid::nil(),
            silver_mode: RunMode::Incremental,
            gold_mode: RunMode::Incremental,
            checkpoint_before: None,
            checkpoint_after: None,
            source_rows: 0,
            new_source_rows: 0,
            deduplicated_rows: 0,
            anomaly_count: 0,
            silver_anomaly_count: 0,
            missing_value_count: 0,
            readings_inserted: 0,
            readings_updated: 0,
            added_columns: Vec::new(),
            rejected: Vec::new(),
            warnings: Vec::new(),
            datasets: Vec::new(),
        }
    }
}

/// Everything a run will commit.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub writes: Vec<DatasetWrite>,
    pub report: RunReport,
}

// ---

/// Run the full pipeline against `store`.
#[tracing::instrument(
    skip_all,
    fields(run_id = tracing::field::Empty, mode = options.mode.as_str())
)]
pub async fn run_pipeline<S: StateStore>(
    store: &S,
    thresholds: &AnomalyThresholds,
    batch: &PipelineBatch,
    options: RunOptions,
) -> Result<RunReport, PipelineError> {
    // ---
    let run_id = Uuid::new_v4();
    tracing::Span::current().record("run_id", tracing::field::display(run_id));

    let prior = match options.mode {
        RunMode::Incremental => PriorState::load(store).await?,
        RunMode::FullRefresh => PriorState::default(),
    };

    let plan = plan_run(run_id, prior, batch, thresholds, options)?;
    store.commit(&plan.writes, &plan.report).await?;

    info!(
        "Run committed: {} new readings, {} anomalies, checkpoint {:?}",
        plan.report.deduplicated_rows, plan.report.anomaly_count, plan.report.checkpoint_after
    );
    Ok(plan.report)
}

/// Compute every dataset write for a run without touching storage.
pub fn plan_run(
    run_id: Uuid,
    prior: PriorState,
    batch: &PipelineBatch,
    thresholds: &AnomalyThresholds,
    options: RunOptions,
) -> Result<RunPlan, PipelineError> {
    // ---
    let silver_mode = options.mode;
    let prior = match silver_mode {
        RunMode::Incremental => prior,
        RunMode::FullRefresh => PriorState::default(),
    };

    // Step 1: Bronze
    let readings = normalize::normalize_readings(&batch.readings);
    let devices = normalize::normalize_devices(&batch.devices);
    let alerts = normalize::normalize_alerts(&batch.alerts);

    let mut rejected = readings.rejected;
    rejected.extend(devices.rejected);
    rejected.extend(alerts.rejected);
    for err in &rejected {
        warn!("Rejected row: {}", err);
    }
    debug!(
        "Bronze: {} readings, {} devices, {} alerts, {} rejected",
        readings.rows.len(),
        devices.rows.len(),
        alerts.rows.len(),
        rejected.len()
    );

    // Step 2: Silver readings
    let checkpoint_before = prior.checkpoint;
    let source_rows = readings.rows.len();
    let fresh = select_new_source(readings.rows, checkpoint_before, |r| r.ingested_at);
    let new_source_rows = fresh.len();
    let cleaned = classify::classify_readings(dedup::dedup_latest(fresh), thresholds);
    let anomaly_count = cleaned.iter().filter(|r| r.is_anomaly).count();
    let missing_value_count = cleaned.iter().filter(|r| r.is_missing_value).count();
    debug!(
        "Silver: {} of {} source rows after checkpoint {:?}, {} after dedup",
        new_source_rows,
        source_rows,
        checkpoint_before,
        cleaned.len()
    );

    let cleaned_ids: HashSet<&str> = cleaned.iter().map(|r| r.reading_id.as_str()).collect();
    let superseded_rows: Vec<Row> = prior
        .readings
        .iter()
        .filter(|row| {
            row.get("reading_id")
                .and_then(Value::as_str)
                .is_some_and(|id| cleaned_ids.contains(id))
        })
        .cloned()
        .collect();

    let readings_merge = merge_incremental(
        prior.readings,
        to_rows(&cleaned)?,
        &["reading_id"],
        "ingested_at",
    )?;
    let silver_readings: Vec<CleanedReading> = from_rows(&readings_merge.rows)?;
    let superseded: Vec<CleanedReading> = from_rows(&superseded_rows)?;
    let checkpoint_after = readings_merge.checkpoint.or(checkpoint_before);

    // Step 3: Silver alerts and device dimension
    let new_alerts: Vec<EnrichedAlert> = alerts.rows.into_iter().map(EnrichedAlert::from).collect();
    let alerts_merge = merge(prior.alerts, to_rows(&new_alerts)?, &["alert_id"])?;
    let silver_alerts: Vec<EnrichedAlert> = from_rows(&alerts_merge.rows)?;

    let new_devices: Vec<DimDevice> = devices.rows.into_iter().map(DimDevice::from).collect();
    let devices_merge = merge(prior.devices, to_rows(&new_devices)?, &["device_id"])?;
    let silver_devices: Vec<DimDevice> = from_rows(&devices_merge.rows)?;

    // Step 4: Silver data tests gate the gold build
    let failures = quality::check_silver(&silver_readings, &silver_alerts);
    if !failures.is_empty() {
        for f in &failures {
            warn!("Quality check '{}' failed on {}: {}", f.check, f.dataset, f.detail);
        }
        return Err(PipelineError::QualityGate(failures));
    }

    let warnings = quality::orphan_records(&cleaned, &new_alerts, &silver_devices);
    for w in &warnings {
        warn!("Integrity: {}", w);
    }

    // Step 5: Gold
    let silver_anomaly_count = silver_readings.iter().filter(|r| r.is_anomaly).count();
    let gold_mode = if silver_mode == RunMode::FullRefresh
        || silver_anomaly_count > options.full_refresh_anomaly_limit
    {
        RunMode::FullRefresh
    } else {
        RunMode::Incremental
    };
    debug!(
        "Gold: {} mode ({} anomalies in silver)",
        gold_mode.as_str(),
        silver_anomaly_count
    );

    let mut changed = cleaned.clone();
    changed.extend(superseded);
    let hourly =
        build_aggregates(Grain::Hour, gold_mode, &silver_readings, &changed, prior.hourly)?;
    let daily = build_aggregates(Grain::Day, gold_mode, &silver_readings, &changed, prior.daily)?;

    let summaries = device_summaries(&silver_devices, &silver_readings, &silver_alerts);
    let locations = location_health(&summaries);

    let writes = vec![
        DatasetWrite {
            dataset: READINGS_DATASET.into(),
            rows: readings_merge.rows,
            checkpoint: match checkpoint_after {
                Some(mark) => CheckpointUpdate::Set(mark),
                None => CheckpointUpdate::Clear,
            },
        },
        keep_checkpoint(ALERTS_DATASET, alerts_merge.rows),
        keep_checkpoint(DEVICES_DATASET, devices_merge.rows),
        keep_checkpoint(HOURLY_DATASET, hourly),
        keep_checkpoint(DAILY_DATASET, daily),
        keep_checkpoint(SUMMARY_DATASET, to_rows(&summaries)?),
        keep_checkpoint(LOCATION_DATASET, to_rows(&locations)?),
    ];

    let report = RunReport {
        run_id,
        silver_mode,
        gold_mode,
        checkpoint_before,
        checkpoint_after,
        source_rows,
        new_source_rows,
        deduplicated_rows: cleaned.len(),
        anomaly_count,
        silver_anomaly_count,
        missing_value_count,
        readings_inserted: readings_merge.inserted,
        readings_updated: readings_merge.updated,
        added_columns: readings_merge.added_columns,
        rejected,
        warnings,
        datasets: writes
            .iter()
            .map(|w| DatasetStat {
                dataset: w.dataset.clone(),
                rows: w.rows.len(),
            })
            .collect(),
    };

    Ok(RunPlan { writes, report })
}

fn keep_checkpoint(dataset: &str, rows: Vec<Row>) -> DatasetWrite {
    DatasetWrite {
        dataset: dataset.into(),
        rows,
        checkpoint: CheckpointUpdate::Keep,
    }
}

/// Rebuild every bucket, or only the buckets touched by `changed` readings.
///
/// In incremental mode a touched bucket that no longer has readings is
/// removed from the persisted rows.
fn build_aggregates(
    grain: Grain,
    mode: RunMode,
    silver: &[CleanedReading],
    changed: &[CleanedReading],
    prior_rows: Vec<Row>,
) -> Result<Vec<Row>, PipelineError> {
    // ---
    if mode == RunMode::FullRefresh {
        return Ok(to_rows(&aggregate(silver, grain))?);
    }

    let touched = touched_buckets(changed, grain);
    if touched.is_empty() {
        return Ok(prior_rows);
    }

    let affected: Vec<CleanedReading> = silver
        .iter()
        .filter(|r| touched.contains(&bucket_key(r, grain)))
        .cloned()
        .collect();
    let fresh = aggregate(&affected, grain);

    let produced: HashSet<&str> = fresh.iter().map(|b| b.metric_key.as_str()).collect();
    let stale: HashSet<String> = touched
        .iter()
        .map(|(device, metric, bucket)| bucket_metric_key(device, *metric, bucket))
        .filter(|key| !produced.contains(key.as_str()))
        .collect();

    let outcome = merge(prior_rows, to_rows(&fresh)?, &["metric_key"])?;
    Ok(outcome
        .rows
        .into_iter()
        .filter(|row| {
            row.get("metric_key")
                .and_then(Value::as_str)
                .map_or(true, |key| !stale.contains(key))
        })
        .collect())
}
