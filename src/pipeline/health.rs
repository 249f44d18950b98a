//! Composite device health score and category.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCategory {
    Healthy,
    Degraded,
    AtRisk,
    Critical,
}

impl HealthCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::AtRisk => "at_risk",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `round(100 - critical*20 - warning*5 - anomaly_rate*0.5 - (100 - completeness)*0.3)`
/// clamped to `[0, 100]`.
pub fn score(
    critical_alerts: u32,
    warning_alerts: u32,
    anomaly_rate_pct: f64,
    completeness_pct: f64,
) -> u8 {
    // ---
    let raw = 100.0
        - f64::from(critical_alerts) * 20.0
        - f64::from(warning_alerts) * 5.0
        - anomaly_rate_pct * 0.5
        - (100.0 - completeness_pct) * 0.3;
    raw.round().clamp(0.0, 100.0) as u8
}

/// First match wins: critical alerts dominate anomaly rate.
pub fn category(critical_alerts: u32, anomaly_rate_pct: f64) -> HealthCategory {
    // ---
    if critical_alerts > 3 {
        HealthCategory::Critical
    } else if critical_alerts > 0 {
        HealthCategory::AtRisk
    } else if anomaly_rate_pct > 10.0 {
        HealthCategory::Degraded
    } else {
        HealthCategory::Healthy
    }
}
