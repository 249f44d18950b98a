//! Persisted pipeline state: dataset rows and incremental checkpoints.
//!
//! Every run reads what it needs up front and writes everything back through
//! one [`StateStore::commit`] call, which either applies all dataset writes,
//! checkpoint updates and the run record or none of them.

use std::{collections::HashMap, future::Future};

use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};
use tokio::sync::Mutex;

use crate::errors::StoreError;
use crate::pipeline::{incremental::Row, RunReport};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointUpdate {
    Keep,
    Set(DateTime<Utc>),
    Clear,
}

/// Full replacement row set for one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetWrite {
    pub dataset: String,
    pub rows: Vec<Row>,
    pub checkpoint: CheckpointUpdate,
}

pub trait StateStore: Send + Sync {
    /// High-water mark already incorporated into `dataset`.
    fn checkpoint(
        &self,
        dataset: &str,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, StoreError>> + Send;

    fn load_rows(&self, dataset: &str) -> impl Future<Output = Result<Vec<Row>, StoreError>> + Send;

    /// Apply all writes atomically and record the run.
    fn commit(
        &self,
        writes: &[DatasetWrite],
        report: &RunReport,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ---

/// PostgreSQL-backed store; tables are created by `schema::create_schema`.
#[derive(Debug, Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl StateStore for PgStateStore {
    async fn checkpoint(&self, dataset: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        // ---
        let mark = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT ordering_key FROM pipeline_checkpoints WHERE dataset_name = $1",
        )
        .bind(dataset)
        .fetch_optional(&self.pool)
        .await?;
        Ok(mark)
    }

    async fn load_rows(&self, dataset: &str) -> Result<Vec<Row>, StoreError> {
        // ---
        let rows = sqlx::query_scalar::<_, Json<Row>>(
            "SELECT row_data FROM dataset_rows WHERE dataset_name = $1 ORDER BY row_seq",
        )
        .bind(dataset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(row)| row).collect())
    }

    async fn commit(&self, writes: &[DatasetWrite], report: &RunReport) -> Result<(), StoreError> {
        // ---
        let report_json = serde_json::to_value(report)?;
        let mut tx = self.pool.begin().await?;

        for write in writes {
            sqlx::query("DELETE FROM dataset_rows WHERE dataset_name = $1")
                .bind(&write.dataset)
                .execute(&mut *tx)
                .await?;

            for (seq, row) in write.rows.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO dataset_rows (dataset_name, row_seq, row_data)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(&write.dataset)
                .bind(seq as i64)
                .bind(Json(row))
                .execute(&mut *tx)
                .await?;
            }

            match write.checkpoint {
                CheckpointUpdate::Keep => {}
                CheckpointUpdate::Set(mark) => {
                    sqlx::query(
                        r#"
                        INSERT INTO pipeline_checkpoints (dataset_name, ordering_key, updated_at)
                        VALUES ($1, $2, now())
                        ON CONFLICT (dataset_name) DO UPDATE SET
                            ordering_key = EXCLUDED.ordering_key,
                            updated_at   = EXCLUDED.updated_at
                        "#,
                    )
                    .bind(&write.dataset)
                    .bind(mark)
                    .execute(&mut *tx)
                    .await?;
                }
                CheckpointUpdate::Clear => {
                    sqlx::query("DELETE FROM pipeline_checkpoints WHERE dataset_name = $1")
                        .bind(&write.dataset)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (run_id, finished_at, silver_mode, gold_mode, report)
            VALUES ($1, now(), $2, $3, $4)
            "#,
        )
        .bind(report.run_id)
        .bind(report.silver_mode.as_str())
        .bind(report.gold_mode.as_str())
        .bind(Json(report_json))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

// ---

#[derive(Debug, Default)]
struct MemoryState {
    rows: HashMap<String, Vec<Row>>,
    checkpoints: HashMap<String, DateTime<Utc>>,
    runs: Vec<serde_json::Value>,
}

/// In-process store used by tests and embedded runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run_count(&self) -> usize {
        self.state.lock().await.runs.len()
    }
}

impl StateStore for MemoryStore {
    async fn checkpoint(&self, dataset: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.state.lock().await.checkpoints.get(dataset).copied())
    }

    async fn load_rows(&self, dataset: &str) -> Result<Vec<Row>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .rows
            .get(dataset)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit(&self, writes: &[DatasetWrite], report: &RunReport) -> Result<(), StoreError> {
        // ---
        // Serialize before taking the lock so a failure leaves state untouched.
        let report_json = serde_json::to_value(report)?;
        let mut state = self.state.lock().await;

        for write in writes {
            state.rows.insert(write.dataset.clone(), write.rows.clone());
            match write.checkpoint {
                CheckpointUpdate::Keep => {}
                CheckpointUpdate::Set(mark) => {
                    state.checkpoints.insert(write.dataset.clone(), mark);
                }
                CheckpointUpdate::Clear => {
                    state.checkpoints.remove(&write.dataset);
                }
            }
        }
        state.runs.push(report_json);
        Ok(())
    }
}
