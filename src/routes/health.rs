// src/routes/health.rs
//! Liveness endpoint for the pipeline service.
//!
//! Used by container orchestrators and CI to check that the process is up and
//! answering HTTP. Follows the Explicit Module Boundary Pattern (EMBP): the
//! handler stays private to this file and the gateway (`mod.rs`) only sees the
//! subrouter.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Handle `GET /health`. Never touches the state store, so a slow database
/// does not make the service look dead.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Subrouter with the `/health` route, generic over the gateway's state type.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
