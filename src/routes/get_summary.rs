use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::Deserialize;
use tracing::{debug, error, info};

use super::AppState;
use crate::pipeline::{gold::DeviceSummary, incremental::from_rows, SUMMARY_DATASET};
use crate::store::StateStore;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/gold/device-summary", get(handler))
}

async fn handler(
    Query(params): Query<SummaryQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    info!("GET /gold/device-summary");

    let rows = match state.store.load_rows(SUMMARY_DATASET).await {
        Ok(rows) => rows,
        Err(e) => {
            error!("Failed to load device summaries: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, Json("Failed to load device summaries"))
                .into_response();
        }
    };

    let summaries: Vec<DeviceSummary> = match from_rows(&rows) {
        Ok(summaries) => summaries,
        Err(e) => {
            error!("Persisted device summary rows are unreadable: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to read device summaries"),
            )
                .into_response();
        }
    };

    let filtered = apply_filters(summaries, &params);
    debug!("Returning {} device summaries", filtered.len());
    (StatusCode::OK, Json(filtered)).into_response()
}

/// Query parameters for filtering device summaries
#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    device_id: Option<String>,
    location: Option<String>,
    /// Health category, e.g. `at_risk`.
    category: Option<String>,
    limit: Option<u32>,
}

/// Apply query filters to device summaries
fn apply_filters(summaries: Vec<DeviceSummary>, params: &SummaryQuery) -> Vec<DeviceSummary> {
    // ---
    debug!("Apply filter: {:?}", params);
    summaries
        .into_iter()
        .filter(|s| {
            params
                .device_id
                .as_ref()
                .map_or(true, |id| &s.device_id == id)
        })
        .filter(|s| {
            params
                .location
                .as_ref()
                .map_or(true, |loc| s.location.as_ref() == Some(loc))
        })
        .filter(|s| {
            params
                .category
                .as_ref()
                .map_or(true, |c| s.health_category.as_str() == c.as_str())
        })
        .take(params.limit.unwrap_or(1000) as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::pipeline::health::HealthCategory;

    fn create_summary(
        device_id: &str,
        location: Option<&str>,
        category: HealthCategory,
    ) -> DeviceSummary {
        // ---
        DeviceSummary {
            device_key: device_id.to_lowercase(),
            device_id: device_id.into(),
            device_name: None,
            device_type: None,
            location: location.map(String::from),
            total_readings: 10,
            anomaly_count: 0,
            missing_count: 0,
            anomaly_rate_pct: 0.0,
            completeness_pct: 100.0,
            critical_alerts: 0,
            warning_alerts: 0,
            open_alerts: 0,
            avg_minutes_to_resolve: None,
            health_score: 100,
            health_category: category,
        }
    }

    fn sample() -> Vec<DeviceSummary> {
        vec![
            create_summary("DEV001", Some("plant-a"), HealthCategory::Healthy),
            create_summary("DEV002", Some("plant-a"), HealthCategory::AtRisk),
            create_summary("DEV003", Some("plant-b"), HealthCategory::AtRisk),
            create_summary("DEV004", None, HealthCategory::Critical),
        ]
    }

    #[test]
    fn test_no_filters_returns_all() {
        // ---
        assert_eq!(apply_filters(sample(), &SummaryQuery::default()).len(), 4);
    }

    #[test]
    fn test_location_and_category_filters() {
        // ---
        let params = SummaryQuery {
            location: Some("plant-a".into()),
            category: Some("at_risk".into()),
            ..Default::default()
        };
        let filtered = apply_filters(sample(), &params);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].device_id, "DEV002");
    }

    #[test]
    fn test_device_filter_and_limit() {
        // ---
        let params = SummaryQuery {
            device_id: Some("DEV004".into()),
            ..Default::default()
        };
        assert_eq!(apply_filters(sample(), &params)[0].device_id, "DEV004");

        let params = SummaryQuery {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(apply_filters(sample(), &params).len(), 2);
    }
}
