//! Database schema management for `iot-medallion-pipeline`.
//!
//! Ensures the state store tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `pipeline_checkpoints` (one high-water mark per dataset),
/// `dataset_rows` (every persisted layer as ordered JSONB rows) and
/// `pipeline_runs` (one report per committed run). Safe to call on every
/// startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_checkpoints (
            dataset_name  TEXT PRIMARY KEY,
            ordering_key  TIMESTAMPTZ NOT NULL,
            updated_at    TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Rows are schemaless so new columns can appear between runs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dataset_rows (
            dataset_name  TEXT   NOT NULL,
            row_seq       BIGINT NOT NULL,
            row_data      JSONB  NOT NULL,
            PRIMARY KEY (dataset_name, row_seq)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id       UUID PRIMARY KEY,
            finished_at  TIMESTAMPTZ NOT NULL,
            silver_mode  TEXT        NOT NULL,
            gold_mode    TEXT        NOT NULL,
            report       JSONB       NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_pipeline_runs_finished_at
            ON pipeline_runs (finished_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
