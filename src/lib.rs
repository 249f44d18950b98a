//! Bronze/Silver/Gold transformation pipeline for IoT sensor readings.
//!
//! Raw readings, devices and alerts are cast and validated (bronze),
//! deduplicated, classified and merged incrementally into persisted silver
//! state, then rolled up into time-bucketed and per-device gold datasets.
//! The `main` binary serves this over HTTP; the modules are exposed here so the
//! pipeline can be embedded and tested without a server.
//!
//! Module boundaries follow the Explicit Module Boundary Pattern (EMBP): each
//! directory has a gateway `mod.rs`, and sibling modules reach shared types
//! through the re-exports below rather than through each other's internals.

pub mod config;
pub mod errors;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod schema;
pub mod store;

pub use config::Config;
pub use errors::PipelineError;
pub use pipeline::{run_pipeline, PipelineBatch, RunOptions, RunReport};
pub use store::{MemoryStore, PgStateStore, StateStore};
