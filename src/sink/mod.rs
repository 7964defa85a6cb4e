//! Result sink
//!
//! Receives exactly one finalized record per run, completed or failed.

use crate::context::compute_context_hash;
use crate::error::OrchestrationError;
use crate::models::{Decision, PipelineRun, RunStatus, Stage};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub mod postgres;

pub use postgres::PostgresResultSink;

/// Immutable record of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: Arc<PipelineRun>,
    pub context_hash: String,
    pub recorded_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(run: PipelineRun) -> Self {
        let context_hash = compute_context_hash(&run.stages, &run.handoff);
        Self {
            run: Arc::new(run),
            context_hash,
            recorded_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run.run_id
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run.run_id,
            customer_name: self.run.request.customer_name.clone(),
            loan_amount: self.run.request.loan_amount,
            status: self.run.status,
            decision: self.run.verdict.as_ref().map(|v| v.decision),
            failed_stage: self.run.failure.as_ref().map(|f| f.stage),
            recorded_at: self.recorded_at,
        }
    }
}

/// Listing view of a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub customer_name: String,
    pub loan_amount: f64,
    pub status: RunStatus,
    pub decision: Option<Decision>,
    pub failed_stage: Option<Stage>,
    pub recorded_at: DateTime<Utc>,
}

/// Check a record's stages still hash to its stored context hash
pub fn verify_integrity(record: &RunRecord) -> bool {
    compute_context_hash(&record.run.stages, &record.run.handoff) == record.context_hash
}

#[async_trait::async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, record: RunRecord) -> Result<()>;
    async fn get(&self, run_id: Uuid) -> Result<Option<RunRecord>>;
    /// Most recent first
    async fn list(&self) -> Result<Vec<RunSummary>>;
}

/// In-memory sink for development and tests
pub struct InMemoryResultSink {
    records: Arc<RwLock<HashMap<Uuid, RunRecord>>>,
}

impl InMemoryResultSink {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryResultSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ResultSink for InMemoryResultSink {
    async fn record(&self, record: RunRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.run_id()) {
            return Err(OrchestrationError::ContextConflict(format!(
                "run {} already recorded",
                record.run_id()
            )));
        }

        info!(
            run_id = %record.run_id(),
            context_hash = %record.context_hash,
            "Run recorded"
        );

        records.insert(record.run_id(), record);
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&run_id).cloned())
    }

    async fn list(&self) -> Result<Vec<RunSummary>> {
        let records = self.records.read().await;
        let mut summaries: Vec<RunSummary> = records.values().map(RunRecord::summary).collect();
        summaries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(summaries)
    }
}

/// Postgres when a database URL is configured, in-memory otherwise
pub fn build_result_sink(database_url: Option<&str>) -> Arc<dyn ResultSink> {
    if let Some(url) = database_url {
        match PostgresResultSink::connect_lazy(url) {
            Ok(sink) => {
                info!("Result sink backend: postgres");
                return Arc::new(sink);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres result sink, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Result sink backend: in-memory");
    Arc::new(InMemoryResultSink::new())
}
