//! Decision synthesizer
//!
//! Folds the qualification, assessment, valuation and document results into
//! one underwriting verdict. Pure: the orchestrator records the result.

use crate::error::OrchestrationError;
use crate::finance::round_to_minor_unit;
use crate::models::{
    ApprovalAuthority, AssessmentPayload, ComponentScores, Decision, DocumentVerificationPayload,
    PolicyCheck, QualificationPayload, ScoreWeights, UnderwritingVerdict, ValuationPayload,
};
use crate::Result;
use tracing::info;

pub mod gates;

pub use gates::{create_default_gate_engine, GateEngine, GateInputs, HardGate};

pub const APPROVE_THRESHOLD: f64 = 75.0;
pub const REFER_THRESHOLD: f64 = 50.0;

pub const RATE_FLOOR: f64 = 8.5;
pub const RATE_CEILING: f64 = 10.5;

/// LTV at or below which the collateral component is maxed out
const LTV_FULL_SCORE: f64 = 0.60;

const HIGH_LTV: f64 = 0.75;
const ELEVATED_FOIR: f64 = 0.50;
const PRIME_CIBIL: u32 = 700;

pub struct DecisionSynthesizer {
    gates: GateEngine,
    weights: ScoreWeights,
}

impl DecisionSynthesizer {
    pub fn new(gates: GateEngine, weights: ScoreWeights) -> Result<Self> {
        if (weights.sum() - 1.0).abs() > 1e-9 {
            return Err(OrchestrationError::ConfigError(format!(
                "score weights must sum to 1.0, got {}",
                weights.sum()
            )));
        }

        Ok(Self { gates, weights })
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    pub fn decide(
        &self,
        qualification: &QualificationPayload,
        assessment: &AssessmentPayload,
        valuation: &ValuationPayload,
        documents: &DocumentVerificationPayload,
    ) -> Result<UnderwritingVerdict> {
        let components = component_scores(qualification, assessment, valuation, documents);
        // Thresholds compare the unrounded score; only the recorded value is rounded
        let raw_score = composite(&components, &self.weights);
        let composite_score = round_to_minor_unit(raw_score);

        let policy_checks = self.gates.evaluate(&GateInputs {
            qualification,
            assessment,
            valuation,
        });

        let failed_gates: Vec<&PolicyCheck> = policy_checks
            .iter()
            .filter(|c| c.gating && !c.passed)
            .collect();
        let failed_policies: Vec<&PolicyCheck> = policy_checks
            .iter()
            .filter(|c| !c.gating && !c.passed)
            .collect();

        let decision = if !failed_gates.is_empty() {
            Decision::Decline
        } else if raw_score >= APPROVE_THRESHOLD {
            if failed_policies.is_empty() {
                Decision::Approve
            } else {
                Decision::Referred
            }
        } else if raw_score >= REFER_THRESHOLD {
            Decision::Referred
        } else {
            Decision::Decline
        };

        let interest_rate = match decision {
            Decision::Approve => Some(interest_rate(raw_score)),
            Decision::Referred => Some(RATE_CEILING),
            Decision::Decline => None,
        };

        let violations = failed_gates.len() + failed_policies.len();
        let approval_authority = match violations {
            0 => ApprovalAuthority::Standard,
            1 => ApprovalAuthority::SeniorManagement,
            _ => ApprovalAuthority::CreditCommittee,
        };

        let (conditions, covenants) = if decision == Decision::Approve {
            loan_conditions(qualification, assessment, valuation)
        } else {
            (Vec::new(), Vec::new())
        };

        let rationale = if !failed_gates.is_empty() {
            let names: Vec<&str> = failed_gates.iter().map(|c| c.policy.as_str()).collect();
            format!(
                "Declined on hard gate(s): {} (score {:.2} recorded only)",
                names.join(", "),
                composite_score
            )
        } else if !failed_policies.is_empty() && decision == Decision::Referred {
            let names: Vec<&str> = failed_policies.iter().map(|c| c.policy.as_str()).collect();
            format!(
                "Score {:.2} referred for policy exception: {}",
                composite_score,
                names.join(", ")
            )
        } else {
            format!("Composite score {:.2} gives {}", composite_score, decision)
        };

        info!(
            decision = %decision,
            composite_score,
            violations,
            "Underwriting decision synthesized"
        );

        Ok(UnderwritingVerdict {
            decision,
            composite_score,
            components,
            weights: self.weights,
            interest_rate,
            policy_checks,
            approval_authority,
            conditions,
            covenants,
            rationale,
        })
    }
}

impl Default for DecisionSynthesizer {
    fn default() -> Self {
        Self {
            gates: create_default_gate_engine(),
            weights: ScoreWeights::STANDARD,
        }
    }
}

/// Normalize each stage output to a [0, 100] higher-is-better component
pub fn component_scores(
    qualification: &QualificationPayload,
    assessment: &AssessmentPayload,
    valuation: &ValuationPayload,
    documents: &DocumentVerificationPayload,
) -> ComponentScores {
    ComponentScores {
        document: documents.document_score.clamp(0.0, 100.0),
        qualification: qualification.qualification_score.clamp(0.0, 100.0),
        credit: ((assessment.cibil_score as f64 - 300.0) / 6.0).clamp(0.0, 100.0),
        risk: (100.0 - assessment.risk_score).clamp(0.0, 100.0),
        ltv: ((1.0 - valuation.ltv) / (1.0 - LTV_FULL_SCORE) * 100.0).clamp(0.0, 100.0),
    }
}

/// Unrounded weighted sum of the components
pub fn composite(components: &ComponentScores, weights: &ScoreWeights) -> f64 {
    components.document * weights.document
        + components.qualification * weights.qualification
        + components.credit * weights.credit
        + components.risk * weights.risk
        + components.ltv * weights.ltv
}

/// Linear in score: 100 prices at the floor, 0 at the ceiling
pub fn interest_rate(score: f64) -> f64 {
    let score = score.clamp(0.0, 100.0);
    round_to_minor_unit(RATE_FLOOR + (RATE_CEILING - RATE_FLOOR) * (100.0 - score) / 100.0)
}

fn loan_conditions(
    qualification: &QualificationPayload,
    assessment: &AssessmentPayload,
    valuation: &ValuationPayload,
) -> (Vec<String>, Vec<String>) {
    let mut conditions: Vec<String> = [
        "Property to be mortgaged as primary security",
        "Life insurance coverage for loan tenure mandatory",
        "Fire and hazard insurance on property required",
        "Income documents to be updated annually",
        "All legal formalities to be completed before disbursement",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if valuation.ltv > HIGH_LTV {
        conditions.push("Additional security or guarantor may be required".to_string());
    }
    if qualification.foir > ELEVATED_FOIR {
        conditions.push("Post-dated cheques for 12 months required".to_string());
    }
    if assessment.cibil_score < PRIME_CIBIL {
        conditions.push("Higher margin/down payment required".to_string());
    }

    let covenants = [
        "Maintain property in good condition",
        "Pay all property taxes on time",
        "Inform bank of any change in employment",
        "No further encumbrance on property without consent",
        "Regular EMI payment on due dates",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    (conditions, covenants)
}
