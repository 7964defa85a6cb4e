//! Postgres-backed result sink
//!
//! Records are stored as JSON text alongside a few indexed columns used for
//! listing. The schema is created on first use.

use super::{ResultSink, RunRecord, RunSummary};
use crate::error::OrchestrationError;
use crate::Result;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

pub struct PostgresResultSink {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

fn db_error(context: &str, e: sqlx::Error) -> OrchestrationError {
    OrchestrationError::DatabaseError(format!("{}: {}", context, e))
}

impl PostgresResultSink {
    /// Build a pool without connecting. Must be called inside a Tokio runtime.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| db_error("Invalid database URL", e))?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pool = &self.pool;

        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS loan_run_records (
                      run_id UUID PRIMARY KEY,
                      customer_name TEXT NOT NULL,
                      status TEXT NOT NULL,
                      decision TEXT,
                      context_hash TEXT NOT NULL,
                      record TEXT NOT NULL,
                      recorded_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_loan_run_records_recorded_at
                    ON loan_run_records (recorded_at DESC);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| db_error("Failed to initialize result sink schema", e))?;

        Ok(())
    }

    fn decode(raw: &str) -> Result<RunRecord> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[async_trait::async_trait]
impl ResultSink for PostgresResultSink {
    async fn record(&self, record: RunRecord) -> Result<()> {
        self.ensure_schema().await?;

        let summary = record.summary();
        let raw = serde_json::to_string(&record)?;
        let status = serde_json::to_value(summary.status)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let decision = summary.decision.map(|d| d.to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO loan_run_records
              (run_id, customer_name, status, decision, context_hash, record, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (run_id) DO NOTHING
            "#,
        )
        .bind(summary.run_id)
        .bind(&summary.customer_name)
        .bind(status)
        .bind(decision)
        .bind(&record.context_hash)
        .bind(raw)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert run record", e))?;

        if result.rows_affected() == 0 {
            return Err(OrchestrationError::ContextConflict(format!(
                "run {} already recorded",
                summary.run_id
            )));
        }

        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT record FROM loan_run_records WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load run record", e))?;

        match row {
            Some(row) => {
                let raw: String = row
                    .try_get("record")
                    .map_err(|e| db_error("Malformed run record row", e))?;
                Ok(Some(Self::decode(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<RunSummary>> {
        self.ensure_schema().await?;

        let rows = sqlx::query("SELECT record FROM loan_run_records ORDER BY recorded_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list run records", e))?;

        rows.iter()
            .map(|row| {
                let raw: String = row
                    .try_get("record")
                    .map_err(|e| db_error("Malformed run record row", e))?;
                Ok(Self::decode(&raw)?.summary())
            })
            .collect()
    }
}
