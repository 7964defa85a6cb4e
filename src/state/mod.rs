//! Run tracker
//!
//! Latest known view of every run by id, updated on each state transition.
//! Backs the status endpoint while a run is still in flight.

use crate::models::PipelineRun;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for run status lookups
#[async_trait::async_trait]
pub trait RunTracker: Send + Sync {
    async fn track(&self, run: &PipelineRun) -> Result<()>;
    async fn load(&self, run_id: Uuid) -> Result<Option<PipelineRun>>;
    async fn in_flight(&self) -> Result<Vec<Uuid>>;
}

/// In-memory tracker for development
pub struct InMemoryRunTracker {
    runs: Arc<RwLock<HashMap<Uuid, PipelineRun>>>,
}

impl InMemoryRunTracker {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryRunTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RunTracker for InMemoryRunTracker {
    async fn track(&self, run: &PipelineRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).cloned())
    }

    async fn in_flight(&self) -> Result<Vec<Uuid>> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .filter(|run| !run.state.is_terminal())
            .map(|run| run.run_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApplicantProfile, LoanApplicationRequest, Stage};
    use crate::pipeline::RunState;

    fn run() -> PipelineRun {
        PipelineRun::new(LoanApplicationRequest {
            customer_name: "Kala Divan".to_string(),
            loan_amount: 4_000_000.0,
            loan_purpose: "Home Loan".to_string(),
            tenure_years: 20,
            contact_number: None,
            email: None,
            profile: ApplicantProfile::default(),
        })
    }

    #[tokio::test]
    async fn test_track_keeps_latest_state() {
        let tracker = InMemoryRunTracker::new();
        let mut run = run();

        tracker.track(&run).await.unwrap();
        run.state = RunState::Running(Stage::CustomerService);
        tracker.track(&run).await.unwrap();

        let loaded = tracker.load(run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, RunState::Running(Stage::CustomerService));
        assert_eq!(tracker.in_flight().await.unwrap(), vec![run.run_id]);

        run.state = RunState::Completed;
        tracker.track(&run).await.unwrap();
        assert!(tracker.in_flight().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let tracker = InMemoryRunTracker::new();
        assert!(tracker.load(Uuid::new_v4()).await.unwrap().is_none());
    }
}
