use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::store::PgStateStore;
use crate::Config;

mod get_summary;
mod health;
mod run_pipeline;

// ---

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub store: PgStateStore,
    pub config: Config,
    /// Held for the duration of a run; runs never overlap within the service.
    pub run_lock: Arc<Mutex<()>>,
}

pub fn router(pool: PgPool, config: Config) -> Router {
    // ---
    let state = AppState {
        store: PgStateStore::new(pool),
        config,
        run_lock: Arc::new(Mutex::new(())),
    };

    Router::new()
        .merge(run_pipeline::router())
        .merge(get_summary::router())
        .merge(health::router())
        .with_state(state)
}
