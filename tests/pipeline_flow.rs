//! End-to-end pipeline behaviour with scripted stage capabilities

use loan_origination_orchestrator::{
    capability::{create_rule_based_registry, CapabilityRequest, StageCapability, StageOutput},
    context::ContextSnapshot,
    error::OrchestrationError,
    models::{
        ApplicantProfile, FailureCode, LoanApplicationRequest, PipelineRun, PropertyDetails,
        RunStatus, Stage,
    },
    pipeline::{Orchestrator, RunState},
    sink::{verify_integrity, InMemoryResultSink, ResultSink},
    state::{InMemoryRunTracker, RunTracker},
    underwriting::DecisionSynthesizer,
    Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum Script {
    Delegate,
    Fail,
    Malformed,
}

/// Wraps a rule-based capability with a delay and a scripted outcome
struct ScriptedCapability {
    inner: Arc<dyn StageCapability>,
    delay: Duration,
    script: Script,
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl StageCapability for ScriptedCapability {
    fn stage(&self) -> Stage {
        self.inner.stage()
    }

    fn description(&self) -> &'static str {
        "Scripted capability"
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<StageOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        match self.script {
            Script::Delegate => self.inner.invoke(request).await,
            Script::Fail => Err(OrchestrationError::StageRejected(format!(
                "{} declined",
                self.stage().as_str()
            ))),
            Script::Malformed => Ok(StageOutput {
                payload: serde_json::json!({ "unexpected": true }),
                rationale: "malformed".to_string(),
                summary: None,
            }),
        }
    }
}

struct Harness {
    orchestrator: Orchestrator,
    sink: Arc<InMemoryResultSink>,
    tracker: Arc<InMemoryRunTracker>,
    calls: Vec<(Stage, Arc<AtomicUsize>)>,
}

impl Harness {
    fn calls(&self, stage: Stage) -> usize {
        self.calls
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, c)| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

fn harness(scripts: Vec<(Stage, Duration, Script)>, stage_timeout: Duration) -> Harness {
    let base = create_rule_based_registry();
    let mut registry = create_rule_based_registry();
    let mut calls = Vec::new();

    for (stage, delay, script) in scripts {
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register(Arc::new(ScriptedCapability {
            inner: base.get(stage).unwrap(),
            delay,
            script,
            calls: counter.clone(),
        }));
        calls.push((stage, counter));
    }

    // Observe downstream stages without changing their behaviour
    for stage in [Stage::CustomerCommunication, Stage::Audit] {
        if calls.iter().any(|(s, _)| *s == stage) {
            continue;
        }
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register(Arc::new(ScriptedCapability {
            inner: base.get(stage).unwrap(),
            delay: Duration::ZERO,
            script: Script::Delegate,
            calls: counter.clone(),
        }));
        calls.push((stage, counter));
    }

    let sink = Arc::new(InMemoryResultSink::new());
    let tracker = Arc::new(InMemoryRunTracker::new());
    let orchestrator = Orchestrator::new(
        registry,
        DecisionSynthesizer::default(),
        sink.clone(),
        tracker.clone(),
    )
    .with_stage_timeout(stage_timeout);

    Harness {
        orchestrator,
        sink,
        tracker,
        calls,
    }
}

fn application() -> LoanApplicationRequest {
    LoanApplicationRequest {
        customer_name: "Kala Divan".to_string(),
        loan_amount: 4_000_000.0,
        loan_purpose: "Home Loan".to_string(),
        tenure_years: 20,
        contact_number: Some("+91-9876543210".to_string()),
        email: Some("kala@example.com".to_string()),
        profile: ApplicantProfile {
            age: Some(30),
            monthly_income: Some(150_000.0),
            existing_emis: Some(0.0),
            employment_years: Some(5.0),
            employment_type: Some("Salaried".to_string()),
            cibil_score: Some(720),
            property: Some(PropertyDetails::default()),
            document_ids: (1..=5).map(|i| format!("doc-{}", i)).collect(),
        },
    }
}

#[tokio::test]
async fn test_valuation_failure_discards_assessment() {
    let h = harness(
        vec![
            (Stage::CreditAssessment, Duration::from_millis(10), Script::Delegate),
            (Stage::AssetValuation, Duration::from_millis(80), Script::Fail),
        ],
        Duration::from_secs(5),
    );

    let run = h.orchestrator.run(application()).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.state, RunState::Failed(Stage::AssetValuation));
    assert!(run.verdict.is_none());
    assert!(run.offer.is_none());

    // Neither branch reached the context
    assert!(run.stage(Stage::CreditAssessment).is_none());
    assert!(run.stage(Stage::AssetValuation).is_none());
    assert_eq!(run.stages.len(), 3);

    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::AssetValuation);
    assert_eq!(failure.code, FailureCode::StageFailed);
    assert_eq!(failure.unmerged.len(), 1);
    assert_eq!(failure.unmerged[0].stage, Stage::CreditAssessment);

    // Nothing after the join ran
    assert_eq!(h.calls(Stage::CustomerCommunication), 0);
    assert_eq!(h.calls(Stage::Audit), 0);
}

#[tokio::test]
async fn test_assessment_failure_aborts_slow_valuation() {
    let h = harness(
        vec![
            (Stage::CreditAssessment, Duration::from_millis(10), Script::Fail),
            (Stage::AssetValuation, Duration::from_secs(3), Script::Delegate),
        ],
        Duration::from_secs(10),
    );

    let started = std::time::Instant::now();
    let run = h.orchestrator.run(application()).await.unwrap();

    assert_eq!(run.state, RunState::Failed(Stage::CreditAssessment));
    assert!(run.failure.as_ref().unwrap().unmerged.is_empty());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_merge_order_is_fixed_when_valuation_finishes_first() {
    let h = harness(
        vec![
            (Stage::CreditAssessment, Duration::from_millis(120), Script::Delegate),
            (Stage::AssetValuation, Duration::from_millis(5), Script::Delegate),
        ],
        Duration::from_secs(5),
    );

    let run = h.orchestrator.run(application()).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    let order: Vec<Stage> = run.stages.iter().map(|r| r.stage).collect();
    assert_eq!(order, Stage::ORDER.to_vec());

    let assessment = run.handoff.find("[Credit Assessment]").unwrap();
    let valuation = run.handoff.find("[Asset Valuation]").unwrap();
    assert!(assessment < valuation);
}

/// Hash of the context up to and including underwriting. Later stages carry
/// the run-specific offer reference.
fn merged_context_hash(run: &PipelineRun) -> String {
    let upto = Stage::Underwriting.position() + 1;
    let handoff: Vec<&str> = run.handoff.lines().take(upto).collect();
    ContextSnapshot::from_results(run.stages[..upto].to_vec(), &handoff.join("\n")).context_hash()
}

#[tokio::test]
async fn test_merged_context_is_identical_for_either_completion_order() {
    let valuation_first = harness(
        vec![
            (Stage::CreditAssessment, Duration::from_millis(120), Script::Delegate),
            (Stage::AssetValuation, Duration::from_millis(5), Script::Delegate),
        ],
        Duration::from_secs(5),
    );
    let assessment_first = harness(
        vec![
            (Stage::CreditAssessment, Duration::from_millis(5), Script::Delegate),
            (Stage::AssetValuation, Duration::from_millis(120), Script::Delegate),
        ],
        Duration::from_secs(5),
    );

    let a = valuation_first.orchestrator.run(application()).await.unwrap();
    let b = assessment_first.orchestrator.run(application()).await.unwrap();

    assert_eq!(a.status, RunStatus::Completed);
    assert_eq!(b.status, RunStatus::Completed);
    assert_eq!(merged_context_hash(&a), merged_context_hash(&b));
    assert_eq!(
        a.verdict.as_ref().unwrap().composite_score,
        b.verdict.as_ref().unwrap().composite_score
    );
}

#[tokio::test]
async fn test_slow_capability_times_out() {
    let h = harness(
        vec![(Stage::DocumentVerification, Duration::from_secs(2), Script::Delegate)],
        Duration::from_millis(100),
    );

    let run = h.orchestrator.run(application()).await.unwrap();

    assert_eq!(run.state, RunState::Failed(Stage::DocumentVerification));
    let failure = run.failure.unwrap();
    assert_eq!(failure.code, FailureCode::Timeout);
    assert_eq!(run.stages.len(), 1);
}

#[tokio::test]
async fn test_malformed_output_is_schema_error() {
    let h = harness(
        vec![(Stage::CreditQualification, Duration::ZERO, Script::Malformed)],
        Duration::from_secs(5),
    );

    let run = h.orchestrator.run(application()).await.unwrap();

    assert_eq!(run.state, RunState::Failed(Stage::CreditQualification));
    assert_eq!(run.failure.unwrap().code, FailureCode::SchemaError);
    assert_eq!(h.calls(Stage::CustomerCommunication), 0);
}

#[tokio::test]
async fn test_failed_run_is_recorded_and_tracked() {
    let h = harness(
        vec![(Stage::AssetValuation, Duration::ZERO, Script::Fail)],
        Duration::from_secs(5),
    );

    let run = h.orchestrator.run(application()).await.unwrap();

    let record = h.sink.get(run.run_id).await.unwrap().unwrap();
    assert!(verify_integrity(&record));
    assert_eq!(record.summary().failed_stage, Some(Stage::AssetValuation));

    let tracked = h.tracker.load(run.run_id).await.unwrap().unwrap();
    assert_eq!(tracked.status, RunStatus::Failed);
    assert!(h.tracker.in_flight().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_runs_stay_isolated() {
    let h = Arc::new(harness(vec![], Duration::from_secs(5)));

    let mut declined = application();
    declined.customer_name = "Ravi Menon".to_string();
    declined.profile.cibil_score = Some(600);

    let (approved, declined) = tokio::join!(
        h.orchestrator.run(application()),
        h.orchestrator.run(declined)
    );
    let (approved, declined) = (approved.unwrap(), declined.unwrap());

    assert_ne!(approved.run_id, declined.run_id);
    assert!(approved.offer.is_some());
    assert!(declined.offer.is_none());
    assert_eq!(h.sink.list().await.unwrap().len(), 2);
}
