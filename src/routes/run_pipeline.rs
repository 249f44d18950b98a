use axum::{
    body::Bytes, extract::Query, extract::State, http::StatusCode, response::IntoResponse,
    routing::post, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::AppState;
use crate::errors::{PipelineError, QualityFailure};
use crate::ingest::fetch_raw_readings;
use crate::pipeline::{incremental::RunMode, run_pipeline, PipelineBatch, RunOptions};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/pipeline/run", post(handler))
}

/// Query parameters for a pipeline run.
#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    #[serde(default)]
    full_refresh: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<QualityFailure>,
}

async fn handler(
    Query(params): Query<RunQuery>,
    State(state): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    // ---
    info!("POST /pipeline/run - full_refresh={}", params.full_refresh);

    let mut batch = match parse_batch(&body) {
        Ok(batch) => batch,
        Err(e) => {
            warn!("Rejected run request body: {}", e);
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid request body: {e}"),
                Vec::new(),
            );
        }
    };

    // Step 1: Pull readings upstream when the caller sent none
    if batch.readings.is_empty() {
        if let Some(api_url) = &state.config.api_url {
            match fetch_raw_readings(api_url, state.config.api_max_pages).await {
                Ok(readings) => batch.readings = readings,
                Err(e) => {
                    error!("Failed to fetch sensor data: {:#}", e);
                    return error_response(StatusCode::BAD_GATEWAY, format!("{e:#}"), Vec::new());
                }
            }
        }
    }

    // Step 2: Run, one at a time
    let options = RunOptions {
        mode: if params.full_refresh {
            RunMode::FullRefresh
        } else {
            RunMode::Incremental
        },
        full_refresh_anomaly_limit: state.config.full_refresh_anomaly_limit,
    };

    let _guard = state.run_lock.lock().await;
    match run_pipeline(&state.store, &state.config.thresholds, &batch, options).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!("Pipeline run failed: {}", e);
            let status = status_for(&e);
            let failures = match e {
                PipelineError::QualityGate(ref failures) => failures.clone(),
                _ => Vec::new(),
            };
            error_response(status, e.to_string(), failures)
        }
    }
}

/// An empty body is an empty batch.
fn parse_batch(body: &[u8]) -> Result<PipelineBatch, serde_json::Error> {
    // ---
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PipelineBatch::default());
    }
    serde_json::from_slice(body)
}

fn status_for(err: &PipelineError) -> StatusCode {
    // ---
    match err {
        PipelineError::SchemaConflict(_) => StatusCode::CONFLICT,
        PipelineError::QualityGate(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(
    status: StatusCode,
    error: String,
    failures: Vec<QualityFailure>,
) -> axum::response::Response {
    (status, Json(ErrorBody { error, failures })).into_response()
}
