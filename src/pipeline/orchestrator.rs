//! Pipeline orchestrator
//!
//! Drives one run through the stage graph: sequential stages, the
//! CreditAssessment ∥ AssetValuation fork, the internal underwriting and
//! offer stages, then publishes the finalized record.

use super::{RunEvent, RunState};
use crate::capability::{invoke_stage, CapabilityRegistry, CapabilityRequest, StageAttempt};
use crate::context::ContextStore;
use crate::models::{
    FailureCode, LoanApplicationRequest, PipelineRun, RunFailure, RunStatus, Stage, StagePayload,
    StageResult,
};
use crate::offer::OfferGenerator;
use crate::sink::{ResultSink, RunRecord};
use crate::state::RunTracker;
use crate::underwriting::DecisionSynthesizer;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30);

type StepResult = std::result::Result<(), RunFailure>;

fn stage_failure(stage: Stage, code: FailureCode, reason: impl Into<String>) -> RunFailure {
    RunFailure {
        stage,
        code,
        reason: reason.into(),
        unmerged: Vec::new(),
    }
}

/// Coordinates stage capabilities and the internal decision stages
pub struct Orchestrator {
    capabilities: Arc<CapabilityRegistry>,
    synthesizer: DecisionSynthesizer,
    offers: OfferGenerator,
    sink: Arc<dyn ResultSink>,
    tracker: Arc<dyn RunTracker>,
    stage_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        capabilities: CapabilityRegistry,
        synthesizer: DecisionSynthesizer,
        sink: Arc<dyn ResultSink>,
        tracker: Arc<dyn RunTracker>,
    ) -> Self {
        let missing = capabilities.missing_stages();
        if !missing.is_empty() {
            warn!(?missing, "Stages without a registered capability will fail");
        }

        Self {
            capabilities: Arc::new(capabilities),
            synthesizer,
            offers: OfferGenerator::new(),
            sink,
            tracker,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    pub fn sink(&self) -> Arc<dyn ResultSink> {
        self.sink.clone()
    }

    pub fn tracker(&self) -> Arc<dyn RunTracker> {
        self.tracker.clone()
    }

    /// Validate the request and register a pending run
    pub async fn begin(&self, request: LoanApplicationRequest) -> Result<PipelineRun> {
        request.validate()?;

        let run = PipelineRun::new(request);
        self.tracker.track(&run).await?;

        info!(
            run_id = %run.run_id,
            customer = %run.request.customer_name,
            loan_amount = run.request.loan_amount,
            "Pipeline run created"
        );

        Ok(run)
    }

    /// Run a request end to end. Only request validation returns an error;
    /// stage failures come back as a `Failed` run.
    pub async fn run(&self, request: LoanApplicationRequest) -> Result<PipelineRun> {
        let run = self.begin(request).await?;
        Ok(self.drive(run).await)
    }

    /// Drive a pending run to a terminal state
    pub async fn drive(&self, mut run: PipelineRun) -> PipelineRun {
        let started = Instant::now();
        let facts = Arc::new(run.request.clone());
        let mut store = ContextStore::new();

        if let Err(e) = self.transition(&mut run, RunEvent::Started).await {
            warn!(run_id = %run.run_id, error = %e, "Run could not start");
            return run;
        }

        loop {
            let state = run.state;
            let step = match state {
                RunState::Running(Stage::Underwriting) => self.underwrite(&mut run, &mut store),
                RunState::Running(Stage::OfferGeneration) => self.generate_offer(&mut run, &mut store),
                RunState::Running(stage) => self.run_stage(&run, stage, &mut store, &facts).await,
                RunState::RunningParallel => self.run_fork(&run, &mut store, &facts).await,
                RunState::Pending | RunState::Completed | RunState::Failed(_) => break,
            };

            let progress = store.snapshot();
            run.stages = progress.results().to_vec();
            run.handoff = progress.handoff().to_string();

            match step {
                Ok(()) => {
                    if let Err(e) = self.transition(&mut run, RunEvent::Succeeded).await {
                        let stage = current_stage(&run.state);
                        self.fail(&mut run, stage_failure(stage, FailureCode::StageFailed, e.to_string()))
                            .await;
                    }
                }
                Err(failure) => self.fail(&mut run, failure).await,
            }
        }

        self.finalize(run, store, started).await
    }

    async fn transition(&self, run: &mut PipelineRun, event: RunEvent) -> Result<()> {
        let next = run.state.advance(event)?;
        debug!(run_id = %run.run_id, from = %run.state, to = %next, "Run state transition");
        run.state = next;
        self.publish(run).await;
        Ok(())
    }

    async fn fail(&self, run: &mut PipelineRun, failure: RunFailure) {
        warn!(
            run_id = %run.run_id,
            stage = failure.stage.as_str(),
            code = ?failure.code,
            reason = %failure.reason,
            "Pipeline run failed"
        );

        run.state = run
            .state
            .fail_at(failure.stage)
            .unwrap_or(RunState::Failed(failure.stage));
        run.failure = Some(failure);
        self.publish(run).await;
    }

    async fn publish(&self, run: &PipelineRun) {
        if let Err(e) = self.tracker.track(run).await {
            warn!(run_id = %run.run_id, error = %e, "Run tracker update failed");
        }
    }

    fn commit(store: &mut ContextStore, attempt: StageAttempt) -> StepResult {
        let StageAttempt { result, summary } = attempt;
        let stage = result.stage;

        if !result.is_success() {
            return Err(stage_failure(
                stage,
                result.failure.unwrap_or(FailureCode::StageFailed),
                result.rationale,
            ));
        }

        store
            .append(result)
            .map_err(|e| stage_failure(stage, e.failure_code(), e.to_string()))?;
        if let Some(summary) = summary {
            store.append_handoff(stage, &summary);
        }

        Ok(())
    }

    fn capability_request(
        &self,
        run: &PipelineRun,
        stage: Stage,
        store: &ContextStore,
        facts: &Arc<LoanApplicationRequest>,
    ) -> CapabilityRequest {
        CapabilityRequest {
            run_id: run.run_id,
            stage,
            context: store.snapshot(),
            facts: facts.clone(),
        }
    }

    //
    // ================= Sequential Stages =================
    //

    async fn run_stage(
        &self,
        run: &PipelineRun,
        stage: Stage,
        store: &mut ContextStore,
        facts: &Arc<LoanApplicationRequest>,
    ) -> StepResult {
        info!(run_id = %run.run_id, stage = stage.as_str(), "Stage started");

        let request = self.capability_request(run, stage, store, facts);
        let attempt = invoke_stage(self.capabilities.get(stage), request, self.stage_timeout).await;

        info!(
            run_id = %run.run_id,
            stage = stage.as_str(),
            status = ?attempt.result.status,
            elapsed_ms = attempt.result.elapsed_ms,
            "Stage finished"
        );

        Self::commit(store, attempt)
    }

    //
    // ================= Fork / Join =================
    //

    /// Both branches read the same snapshot. The join is all-or-nothing: a
    /// failed branch aborts its sibling and neither result is appended.
    async fn run_fork(
        &self,
        run: &PipelineRun,
        store: &mut ContextStore,
        facts: &Arc<LoanApplicationRequest>,
    ) -> StepResult {
        let snapshot = store.snapshot();
        let mut branches = JoinSet::new();

        for (slot, stage) in Stage::PARALLEL.iter().copied().enumerate() {
            let capability = self.capabilities.get(stage);
            let request = CapabilityRequest {
                run_id: run.run_id,
                stage,
                context: snapshot.clone(),
                facts: facts.clone(),
            };
            let timeout = self.stage_timeout;

            info!(run_id = %run.run_id, stage = stage.as_str(), "Branch started");
            branches.spawn(async move { (slot, invoke_stage(capability, request, timeout).await) });
        }

        let mut slots: [Option<StageAttempt>; 2] = [None, None];
        let mut failure: Option<RunFailure> = None;

        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok((slot, attempt)) => {
                    debug!(
                        run_id = %run.run_id,
                        stage = attempt.result.stage.as_str(),
                        status = ?attempt.result.status,
                        elapsed_ms = attempt.result.elapsed_ms,
                        "Branch finished"
                    );

                    if attempt.result.is_success() {
                        slots[slot] = Some(attempt);
                    } else {
                        let result = attempt.result;
                        failure = Some(stage_failure(
                            result.stage,
                            result.failure.unwrap_or(FailureCode::StageFailed),
                            result.rationale,
                        ));
                        break;
                    }
                }
                Err(e) => {
                    // A panicked branch is attributed to the first branch without a result
                    let stage = Stage::PARALLEL
                        .iter()
                        .zip(slots.iter())
                        .find(|(_, slot)| slot.is_none())
                        .map(|(stage, _)| *stage)
                        .unwrap_or(Stage::PARALLEL[0]);
                    failure = Some(stage_failure(
                        stage,
                        FailureCode::Unavailable,
                        format!("branch task aborted: {}", e),
                    ));
                    break;
                }
            }
        }

        if let Some(mut failure) = failure {
            branches.shutdown().await;
            failure.unmerged = slots
                .into_iter()
                .flatten()
                .map(|attempt| attempt.result)
                .collect();

            warn!(
                run_id = %run.run_id,
                stage = failure.stage.as_str(),
                unmerged = failure.unmerged.len(),
                "Join failed; branch results discarded"
            );
            return Err(failure);
        }

        // Merge in declared order regardless of completion order
        for (stage, slot) in Stage::PARALLEL.iter().zip(slots) {
            let attempt = slot.ok_or_else(|| {
                stage_failure(*stage, FailureCode::StageFailed, "branch produced no result")
            })?;
            Self::commit(store, attempt)?;
        }

        info!(run_id = %run.run_id, "Join complete");
        Ok(())
    }

    //
    // ================= Internal Stages =================
    //

    fn underwrite(&self, run: &mut PipelineRun, store: &mut ContextStore) -> StepResult {
        let stage = Stage::Underwriting;
        let started = Instant::now();
        let snapshot = store.snapshot();

        let (qualification, assessment, valuation, documents) = match (
            snapshot.qualification(),
            snapshot.assessment(),
            snapshot.valuation(),
            snapshot.document_verification(),
        ) {
            (Some(q), Some(a), Some(v), Some(d)) => (q, a, v, d),
            _ => {
                return Err(stage_failure(
                    stage,
                    FailureCode::StageFailed,
                    "underwriting inputs missing from context",
                ))
            }
        };

        let verdict = self
            .synthesizer
            .decide(qualification, assessment, valuation, documents)
            .map_err(|e| stage_failure(stage, e.failure_code(), e.to_string()))?;

        info!(
            run_id = %run.run_id,
            decision = %verdict.decision,
            composite_score = verdict.composite_score,
            "Underwriting complete"
        );

        let summary = format!(
            "{} at score {:.2}{}",
            verdict.decision,
            verdict.composite_score,
            verdict
                .interest_rate
                .map(|r| format!(", rate {:.2}%", r))
                .unwrap_or_default()
        );

        let result = StageResult::succeeded(
            stage,
            StagePayload::Underwriting(verdict.clone()),
            verdict.rationale.clone(),
            started.elapsed().as_millis() as u64,
        );
        Self::commit(
            store,
            StageAttempt {
                result,
                summary: Some(summary),
            },
        )?;

        run.verdict = Some(verdict);
        Ok(())
    }

    fn generate_offer(&self, run: &mut PipelineRun, store: &mut ContextStore) -> StepResult {
        let stage = Stage::OfferGeneration;
        let started = Instant::now();
        let snapshot = store.snapshot();

        let (verdict, qualification) = match (snapshot.verdict(), snapshot.qualification()) {
            (Some(v), Some(q)) => (v, q),
            _ => {
                return Err(stage_failure(
                    stage,
                    FailureCode::StageFailed,
                    "offer inputs missing from context",
                ))
            }
        };

        let payload = self
            .offers
            .generate(
                run.run_id,
                &run.request,
                verdict,
                qualification,
                Utc::now().date_naive(),
            )
            .map_err(|e| stage_failure(stage, e.failure_code(), e.to_string()))?;

        let (rationale, summary) = match &payload.offer {
            Some(offer) => (
                format!(
                    "Offer {} for Rs {:.2} at {:.2}% over {} months",
                    offer.offer_reference, offer.principal, offer.annual_rate, offer.tenure_months
                ),
                format!("Offer issued; EMI Rs {:.2}", offer.emi),
            ),
            None => {
                let reason = payload.reason.clone().unwrap_or_default();
                (reason.clone(), format!("No offer: {}", reason))
            }
        };

        run.offer = payload.offer.clone();

        let result = StageResult::succeeded(
            stage,
            StagePayload::Offer(payload),
            rationale,
            started.elapsed().as_millis() as u64,
        );
        Self::commit(
            store,
            StageAttempt {
                result,
                summary: Some(summary),
            },
        )
    }

    //
    // ================= Finalize =================
    //

    async fn finalize(&self, mut run: PipelineRun, store: ContextStore, started: Instant) -> PipelineRun {
        let (stages, handoff) = store.into_parts();
        run.stages = stages;
        run.handoff = handoff;
        run.status = match run.state {
            RunState::Completed => RunStatus::Completed,
            _ => RunStatus::Failed,
        };
        run.finished_at = Some(Utc::now());
        self.publish(&run).await;

        info!(
            run_id = %run.run_id,
            status = ?run.status,
            stages = run.stages.len(),
            decision = ?run.verdict.as_ref().map(|v| v.decision),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline run finished"
        );

        if let Err(e) = self.sink.record(RunRecord::new(run.clone())).await {
            warn!(run_id = %run.run_id, error = %e, "Result sink rejected run record");
        }

        run
    }
}

fn current_stage(state: &RunState) -> Stage {
    match state {
        RunState::Running(stage) | RunState::Failed(stage) => *stage,
        RunState::RunningParallel => Stage::PARALLEL[0],
        RunState::Pending => Stage::CustomerService,
        RunState::Completed => Stage::Audit,
    }
}
