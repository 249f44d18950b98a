//! Per-metric anomaly thresholds, validated once when configuration loads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::models::MetricName;

// ---

/// Inclusive-range bounds; a value is anomalous strictly outside them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
}

impl Bounds {
    pub const fn between(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    pub const fn upper_only(upper: f64) -> Self {
        Self {
            lower: None,
            upper: Some(upper),
        }
    }
}

/// Validated threshold set covering every [`MetricName`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyThresholds {
    bounds: BTreeMap<MetricName, Bounds>,
}

/// Bounds used when no override is configured.
pub fn default_bounds() -> BTreeMap<MetricName, Bounds> {
    // ---
    BTreeMap::from([
        (MetricName::Temperature, Bounds::between(10.0, 85.0)),
        (MetricName::Vibration, Bounds::upper_only(10.0)),
        (MetricName::Humidity, Bounds::between(20.0, 80.0)),
        (MetricName::Pressure, Bounds::between(950.0, 1050.0)),
    ])
}

impl AnomalyThresholds {
    /// Validate a complete threshold map.
    ///
    /// Every metric needs at least one bound and vibration needs an upper
    /// bound. Bounds must be finite, non-negative and `lower <= upper`.
    pub fn new(bounds: BTreeMap<MetricName, Bounds>) -> Result<Self, ConfigError> {
        // ---
        for metric in MetricName::ALL {
            let b = bounds
                .get(&metric)
                .ok_or_else(|| ConfigError::MissingMetric(metric.to_string()))?;
            validate(metric, b)?;
        }
        Ok(Self { bounds })
    }

    /// Build from string-keyed bounds, as read from a JSON document.
    pub fn from_named(named: BTreeMap<String, Bounds>) -> Result<Self, ConfigError> {
        Self::new(parse_named(named)?)
    }

    pub fn get(&self, metric: MetricName) -> Option<&Bounds> {
        self.bounds.get(&metric)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricName, &Bounds)> {
        self.bounds.iter()
    }
}

/// Resolve metric names without validating the bounds themselves.
pub fn parse_named(
    named: BTreeMap<String, Bounds>,
) -> Result<BTreeMap<MetricName, Bounds>, ConfigError> {
    // ---
    named
        .into_iter()
        .map(|(name, b)| {
            name.parse::<MetricName>()
                .map(|metric| (metric, b))
                .map_err(|_| ConfigError::UnknownMetric(name))
        })
        .collect()
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            bounds: default_bounds(),
        }
    }
}

fn validate(metric: MetricName, b: &Bounds) -> Result<(), ConfigError> {
    // ---
    let name = metric.to_string();
    if b.lower.is_none() && b.upper.is_none() {
        return Err(ConfigError::MissingMetric(name));
    }
    if metric == MetricName::Vibration && b.upper.is_none() {
        return Err(ConfigError::MissingUpperBound { metric: name });
    }
    for (bound, value) in [("lower", b.lower), ("upper", b.upper)] {
        let Some(value) = value else { continue };
        if !value.is_finite() {
            return Err(ConfigError::NonFiniteBound {
                metric: name,
                bound,
            });
        }
        if value < 0.0 {
            return Err(ConfigError::NegativeBound {
                metric: name,
                bound,
                value,
            });
        }
    }
    if let (Some(lower), Some(upper)) = (b.lower, b.upper) {
        if lower > upper {
            return Err(ConfigError::InvertedBounds {
                metric: name,
                lower,
                upper,
            });
        }
    }
    Ok(())
}
