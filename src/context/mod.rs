//! Run context store
//!
//! Append-only record of stage output for a single pipeline run, plus the
//! narrative handoff passed from stage to stage. Owned by exactly one run.

use crate::error::OrchestrationError;
use crate::models::{
    AssessmentPayload, DocumentVerificationPayload, QualificationPayload, Stage, StagePayload,
    StageResult, StageStatus, UnderwritingVerdict, ValuationPayload,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::sync::Arc;

/// Mutable side of the run context. Only the orchestrator appends.
#[derive(Debug, Default)]
pub struct ContextStore {
    results: Vec<StageResult>,
    handoff: String,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed stage. A stage may only be recorded once.
    pub fn append(&mut self, result: StageResult) -> Result<()> {
        if self.results.iter().any(|r| r.stage == result.stage) {
            return Err(OrchestrationError::ContextConflict(format!(
                "result for {} already recorded",
                result.stage.as_str()
            )));
        }

        self.results.push(result);
        Ok(())
    }

    /// Add a stage summary to the narrative handoff
    pub fn append_handoff(&mut self, stage: Stage, summary: &str) {
        let summary = summary.trim();
        if summary.is_empty() {
            return;
        }

        if !self.handoff.is_empty() {
            self.handoff.push('\n');
        }
        self.handoff.push_str(&format!("[{}] {}", stage, summary));
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.results.iter().any(|r| r.stage == stage)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Immutable view of everything appended so far
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            results: Arc::from(self.results.clone()),
            handoff: Arc::from(self.handoff.as_str()),
        }
    }

    pub fn into_parts(self) -> (Vec<StageResult>, String) {
        (self.results, self.handoff)
    }
}

/// Read-only view shared by concurrent stage branches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    results: Arc<[StageResult]>,
    handoff: Arc<str>,
}

impl ContextSnapshot {
    pub fn empty() -> Self {
        ContextStore::new().snapshot()
    }

    pub fn from_results(results: Vec<StageResult>, handoff: &str) -> Self {
        Self {
            results: Arc::from(results),
            handoff: Arc::from(handoff),
        }
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn handoff(&self) -> &str {
        &self.handoff
    }

    pub fn get(&self, stage: Stage) -> Option<&StageResult> {
        self.results
            .iter()
            .find(|r| r.stage == stage && r.status == StageStatus::Succeeded)
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.results.iter().map(|r| r.stage).collect()
    }

    pub fn document_verification(&self) -> Option<&DocumentVerificationPayload> {
        match self.get(Stage::DocumentVerification).map(|r| &r.payload) {
            Some(StagePayload::DocumentVerification(p)) => Some(p),
            _ => None,
        }
    }

    pub fn qualification(&self) -> Option<&QualificationPayload> {
        match self.get(Stage::CreditQualification).map(|r| &r.payload) {
            Some(StagePayload::Qualification(p)) => Some(p),
            _ => None,
        }
    }

    pub fn assessment(&self) -> Option<&AssessmentPayload> {
        match self.get(Stage::CreditAssessment).map(|r| &r.payload) {
            Some(StagePayload::Assessment(p)) => Some(p),
            _ => None,
        }
    }

    pub fn valuation(&self) -> Option<&ValuationPayload> {
        match self.get(Stage::AssetValuation).map(|r| &r.payload) {
            Some(StagePayload::Valuation(p)) => Some(p),
            _ => None,
        }
    }

    pub fn verdict(&self) -> Option<&UnderwritingVerdict> {
        match self.get(Stage::Underwriting).map(|r| &r.payload) {
            Some(StagePayload::Underwriting(v)) => Some(v),
            _ => None,
        }
    }

    /// SHA-256 over the outcome-bearing fields of every result, in order.
    ///
    /// Timing fields are excluded so identical stage outcomes hash identically.
    pub fn context_hash(&self) -> String {
        compute_context_hash(&self.results, &self.handoff)
    }
}

#[derive(Serialize)]
struct CanonicalEntry<'a> {
    stage: Stage,
    status: StageStatus,
    payload: &'a StagePayload,
    rationale: &'a str,
}

/// Hash a stage list and handoff for integrity verification
pub fn compute_context_hash(results: &[StageResult], handoff: &str) -> String {
    let mut hasher = Sha256::new();

    let entries: Vec<CanonicalEntry<'_>> = results
        .iter()
        .map(|r| CanonicalEntry {
            stage: r.stage,
            status: r.status,
            payload: &r.payload,
            rationale: &r.rationale,
        })
        .collect();

    // Stream JSON directly into hasher
    if serde_json::to_writer(&mut HashWriter(&mut hasher), &entries).is_err() {
        return String::new();
    }
    hasher.update(handoff.as_bytes());

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureCode, IntakePayload};

    fn intake() -> StageResult {
        StageResult::succeeded(
            Stage::CustomerService,
            StagePayload::Intake(IntakePayload {
                application_complete: true,
                missing_items: vec![],
            }),
            "Application captured".to_string(),
            3,
        )
    }

    #[test]
    fn test_append_rejects_duplicate_stage() {
        let mut store = ContextStore::new();
        assert!(store.append(intake()).is_ok());

        let second = store.append(intake());
        assert!(matches!(second, Err(OrchestrationError::ContextConflict(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_appends() {
        let mut store = ContextStore::new();
        store.append(intake()).unwrap();
        store.append_handoff(Stage::CustomerService, "Intake complete");

        let snapshot = store.snapshot();
        store
            .append(StageResult::failed(
                Stage::DocumentVerification,
                FailureCode::Timeout,
                "late".to_string(),
                10,
            ))
            .unwrap();
        store.append_handoff(Stage::DocumentVerification, "should not leak");

        assert_eq!(snapshot.results().len(), 1);
        assert_eq!(snapshot.handoff(), "[Customer Service] Intake complete");
        assert_eq!(store.snapshot().results().len(), 2);
    }

    #[test]
    fn test_handoff_accumulates_in_order() {
        let mut store = ContextStore::new();
        store.append_handoff(Stage::CustomerService, "first");
        store.append_handoff(Stage::DocumentVerification, "   ");
        store.append_handoff(Stage::CreditQualification, "second");

        assert_eq!(
            store.snapshot().handoff(),
            "[Customer Service] first\n[Credit Qualification] second"
        );
    }

    #[test]
    fn test_context_hash_ignores_timing() {
        let mut a = intake();
        let mut b = intake();
        a.elapsed_ms = 1;
        b.elapsed_ms = 999;

        let left = ContextSnapshot::from_results(vec![a], "x");
        let right = ContextSnapshot::from_results(vec![b], "x");
        assert_eq!(left.context_hash(), right.context_hash());
        assert_eq!(left.context_hash().len(), 64);

        let other = ContextSnapshot::from_results(vec![intake()], "y");
        assert_ne!(left.context_hash(), other.context_hash());
    }

    #[test]
    fn test_typed_accessors_skip_failed_results() {
        let snapshot = ContextSnapshot::from_results(
            vec![StageResult::failed(
                Stage::CreditQualification,
                FailureCode::SchemaError,
                "bad".to_string(),
                0,
            )],
            "",
        );
        assert!(snapshot.qualification().is_none());
        assert!(snapshot.get(Stage::CreditQualification).is_none());
    }
}
