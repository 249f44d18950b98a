//! Configuration loader for the `iot-medallion-pipeline` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Anomaly thresholds are resolved and validated here
//! so a bad threshold set stops the service at startup instead of failing a run.
//!
use std::{collections::BTreeMap, env, fs};

use anyhow::{anyhow, Context, Result};

use crate::models::MetricName;
use crate::pipeline::thresholds::{default_bounds, parse_named, AnomalyThresholds, Bounds};
use crate::pipeline::DEFAULT_FULL_REFRESH_ANOMALY_LIMIT;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Parse an optional floating point value from a lookup function.
macro_rules! parse_lookup_f64 {
    ($lookup:expr, $var_name:expr) => {{
        let name = $var_name;
        $lookup(name.as_str())
            .map(|v| v.trim().parse::<f64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", name, e))?
    }};
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string for the state store.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Raw reading API base URL, used when a run request carries no readings.
    pub api_url: Option<String>,

    /// Maximum number of API pages to fetch (safety limit).
    pub api_max_pages: u32,

    /// Socket address the HTTP server binds to.
    pub bind_addr: String,

    /// Silver anomalies above this switch the gold build to full refresh.
    pub full_refresh_anomaly_limit: usize,

    pub thresholds: AnomalyThresholds,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `SENSOR_API_URL` – raw reading API base URL (no pulls when unset)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `API_MAX_PAGES` – max API pages to fetch (default: 100)
/// - `BIND_ADDR` – listen address (default: `0.0.0.0:8080`)
/// - `FULL_REFRESH_ANOMALY_LIMIT` – default: 50
/// - `ANOMALY_THRESHOLDS_FILE` – JSON threshold document replacing the defaults
/// - `ANOMALY_<METRIC>_LOWER` / `ANOMALY_<METRIC>_UPPER` – per-bound overrides
///
/// Returns an error if any required variable is missing or any value is invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let api_url = env::var("SENSOR_API_URL").ok().filter(|v| !v.trim().is_empty());
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let api_max_pages = parse_env_u32!("API_MAX_PAGES", 100);
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let full_refresh_anomaly_limit = parse_env_u32!(
        "FULL_REFRESH_ANOMALY_LIMIT",
        DEFAULT_FULL_REFRESH_ANOMALY_LIMIT as u32
    ) as usize;
    let thresholds = load_thresholds(|name| env::var(name).ok())?;

    Ok(Config {
        db_url,
        db_pool_max,
        api_url,
        api_max_pages,
        bind_addr,
        full_refresh_anomaly_limit,
        thresholds,
    })
}

/// Resolve anomaly thresholds: defaults, then the optional JSON file, then
/// per-bound overrides. The result is validated as a whole.
pub fn load_thresholds<F>(lookup: F) -> Result<AnomalyThresholds>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let mut bounds = match lookup("ANOMALY_THRESHOLDS_FILE") {
        Some(path) => read_thresholds_file(&path)?,
        None => default_bounds(),
    };

    for metric in MetricName::ALL {
        let prefix = format!("ANOMALY_{}", metric.as_str().to_uppercase());
        let lower = parse_lookup_f64!(lookup, format!("{prefix}_LOWER"));
        let upper = parse_lookup_f64!(lookup, format!("{prefix}_UPPER"));
        if lower.is_none() && upper.is_none() {
            continue;
        }
        let entry = bounds.entry(metric).or_default();
        if lower.is_some() {
            entry.lower = lower;
        }
        if upper.is_some() {
            entry.upper = upper;
        }
    }

    Ok(AnomalyThresholds::new(bounds)?)
}

fn read_thresholds_file(path: &str) -> Result<BTreeMap<MetricName, Bounds>> {
    // ---
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read thresholds file '{path}'"))?;
    let named: BTreeMap<String, Bounds> =
        serde_json::from_str(&text).with_context(|| format!("Invalid thresholds file '{path}'"))?;
    Ok(parse_named(named)?)
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL               : {}", mask_db_url(&self.db_url));
        tracing::info!(
            "  SENSOR_API_URL             : {}",
            self.api_url.as_deref().unwrap_or("<unset>")
        );
        tracing::info!("  DB_POOL_MAX                : {}", self.db_pool_max);
        tracing::info!("  API_MAX_PAGES              : {}", self.api_max_pages);
        tracing::info!("  BIND_ADDR                  : {}", self.bind_addr);
        tracing::info!("  FULL_REFRESH_ANOMALY_LIMIT : {}", self.full_refresh_anomaly_limit);
        for (metric, b) in self.thresholds.iter() {
            tracing::info!(
                "  threshold {:<12}     : lower={:?} upper={:?}",
                metric.as_str(),
                b.lower,
                b.upper
            );
        }
    }
}

/// Replace the password in a connection string with `****`.
fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
        }
    }
    db_url.to_string()
}
