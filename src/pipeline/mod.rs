//! Pipeline run state machine
//!
//! CustomerService → DocumentVerification → CreditQualification →
//! {CreditAssessment ∥ AssetValuation} → Underwriting → OfferGeneration →
//! CustomerCommunication → Audit

use crate::error::OrchestrationError;
use crate::models::Stage;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod orchestrator;

pub use orchestrator::Orchestrator;

/// Where a run currently is
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running(Stage),
    /// CreditAssessment and AssetValuation in flight together
    RunningParallel,
    Completed,
    Failed(Stage),
}

/// Outcome fed into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Started,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed(_))
    }

    /// Pure transition function.
    ///
    /// `Failed` from the parallel state is attributed to the join, which is
    /// reported against CreditAssessment unless the orchestrator says otherwise
    /// through `fail_at`.
    pub fn advance(self, event: RunEvent) -> Result<RunState> {
        let next = match (self, event) {
            (RunState::Pending, RunEvent::Started) => RunState::Running(Stage::CustomerService),
            (RunState::Running(stage), RunEvent::Succeeded) => next_after(stage),
            (RunState::Running(stage), RunEvent::Failed) => RunState::Failed(stage),
            (RunState::RunningParallel, RunEvent::Succeeded) => RunState::Running(Stage::Underwriting),
            (RunState::RunningParallel, RunEvent::Failed) => RunState::Failed(Stage::PARALLEL[0]),
            (state, event) => {
                return Err(OrchestrationError::InvalidTransition(format!(
                    "{:?} cannot handle {:?}",
                    state, event
                )))
            }
        };

        Ok(next)
    }

    /// Fail the current state at a specific stage
    pub fn fail_at(self, stage: Stage) -> Result<RunState> {
        match self {
            RunState::Running(current) if current == stage => Ok(RunState::Failed(stage)),
            RunState::RunningParallel if stage.is_parallel_branch() => Ok(RunState::Failed(stage)),
            state => Err(OrchestrationError::InvalidTransition(format!(
                "{:?} cannot fail at {}",
                state,
                stage.as_str()
            ))),
        }
    }
}

fn next_after(stage: Stage) -> RunState {
    match stage {
        Stage::CustomerService => RunState::Running(Stage::DocumentVerification),
        Stage::DocumentVerification => RunState::Running(Stage::CreditQualification),
        Stage::CreditQualification => RunState::RunningParallel,
        // Branches never run as a single stage; the join owns them
        Stage::CreditAssessment | Stage::AssetValuation => RunState::Running(Stage::Underwriting),
        Stage::Underwriting => RunState::Running(Stage::OfferGeneration),
        Stage::OfferGeneration => RunState::Running(Stage::CustomerCommunication),
        Stage::CustomerCommunication => RunState::Running(Stage::Audit),
        Stage::Audit => RunState::Completed,
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running(stage) => write!(f, "running:{}", stage.as_str()),
            RunState::RunningParallel => write!(f, "running:parallel"),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed(stage) => write!(f, "failed:{}", stage.as_str()),
        }
    }
}
