//! Core data models for the loan pipeline

use crate::error::OrchestrationError;
use crate::finance;
use crate::pipeline::RunState;
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

//
// ================= Application =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApplicationRequest {
    pub customer_name: String,
    pub loan_amount: f64,
    pub loan_purpose: String,
    pub tenure_years: u32,
    #[serde(default)]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile: ApplicantProfile,
}

impl LoanApplicationRequest {
    /// Reject requests that cannot identify a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.customer_name.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "customer_name must not be empty".to_string(),
            ));
        }

        if !self.loan_amount.is_finite() || self.loan_amount <= 0.0 {
            return Err(OrchestrationError::InvalidInput(format!(
                "loan_amount must be a positive amount, got {}",
                self.loan_amount
            )));
        }

        // Amounts finer than one paisa are not representable in the ledger.
        let minor_units = self.loan_amount * 100.0;
        if (minor_units - minor_units.round()).abs() > 1e-6 {
            return Err(OrchestrationError::InvalidInput(format!(
                "loan_amount {} has more than two decimal places",
                self.loan_amount
            )));
        }

        if self.tenure_years == 0 || self.tenure_years > finance::MAX_TENURE_YEARS {
            return Err(OrchestrationError::InvalidInput(format!(
                "tenure_years must be between 1 and {}, got {}",
                finance::MAX_TENURE_YEARS,
                self.tenure_years
            )));
        }

        if self.loan_purpose.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "loan_purpose must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Facts about the applicant forwarded to every stage capability.
///
/// Every field is optional on the wire; capabilities fall back to their own
/// defaults when a fact is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicantProfile {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub monthly_income: Option<f64>,
    #[serde(default)]
    pub existing_emis: Option<f64>,
    #[serde(default)]
    pub employment_years: Option<f64>,
    #[serde(default)]
    pub employment_type: Option<String>,
    #[serde(default)]
    pub cibil_score: Option<u32>,
    #[serde(default)]
    pub property: Option<PropertyDetails>,
    /// Identifiers of previously uploaded documents
    #[serde(default)]
    pub document_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDetails {
    pub collateral_type: CollateralType,
    pub location: LocationTier,
    pub built_up_area_sqft: f64,
    pub age_years: u32,
    pub construction_quality: ConstructionQuality,
    #[serde(default = "default_true")]
    pub clear_title: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PropertyDetails {
    fn default() -> Self {
        Self {
            collateral_type: CollateralType::Residential,
            location: LocationTier::Metro,
            built_up_area_sqft: 1500.0,
            age_years: 5,
            construction_quality: ConstructionQuality::Good,
            clear_title: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollateralType {
    Residential,
    Commercial,
    Industrial,
    Plot,
    MixedUse,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocationTier {
    Metro,
    Tier1,
    Tier2,
    Tier3,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConstructionQuality {
    Excellent,
    Good,
    Average,
    BelowAverage,
}

//
// ================= Stages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CustomerService,
    DocumentVerification,
    CreditQualification,
    CreditAssessment,
    AssetValuation,
    Underwriting,
    OfferGeneration,
    CustomerCommunication,
    Audit,
}

impl Stage {
    /// Declared pipeline order. The two forked branches are listed in their
    /// merge order.
    pub const ORDER: [Stage; 9] = [
        Stage::CustomerService,
        Stage::DocumentVerification,
        Stage::CreditQualification,
        Stage::CreditAssessment,
        Stage::AssetValuation,
        Stage::Underwriting,
        Stage::OfferGeneration,
        Stage::CustomerCommunication,
        Stage::Audit,
    ];

    /// Stages forked after credit qualification, in merge order
    pub const PARALLEL: [Stage; 2] = [Stage::CreditAssessment, Stage::AssetValuation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CustomerService => "customer_service",
            Stage::DocumentVerification => "document_verification",
            Stage::CreditQualification => "credit_qualification",
            Stage::CreditAssessment => "credit_assessment",
            Stage::AssetValuation => "asset_valuation",
            Stage::Underwriting => "underwriting",
            Stage::OfferGeneration => "offer_generation",
            Stage::CustomerCommunication => "customer_communication",
            Stage::Audit => "audit",
        }
    }

    pub fn position(&self) -> usize {
        Stage::ORDER
            .iter()
            .position(|s| s == self)
            .unwrap_or(Stage::ORDER.len())
    }

    pub fn is_parallel_branch(&self) -> bool {
        Stage::PARALLEL.contains(self)
    }

    /// Underwriting and offer generation are computed by the core itself.
    pub fn is_internal(&self) -> bool {
        matches!(self, Stage::Underwriting | Stage::OfferGeneration)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::CustomerService => "Customer Service",
            Stage::DocumentVerification => "Document Verification",
            Stage::CreditQualification => "Credit Qualification",
            Stage::CreditAssessment => "Credit Assessment",
            Stage::AssetValuation => "Asset Valuation",
            Stage::Underwriting => "Underwriting",
            Stage::OfferGeneration => "Offer Generation",
            Stage::CustomerCommunication => "Customer Communication",
            Stage::Audit => "Audit",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    Timeout,
    SchemaError,
    Unavailable,
    InvalidInput,
    StageFailed,
}

//
// ================= Stage Payloads =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntakePayload {
    pub application_complete: bool,
    #[serde(default)]
    pub missing_items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentVerificationPayload {
    pub verified: bool,
    /// Completeness and authenticity score in [0, 100]
    pub document_score: f64,
    #[serde(default)]
    pub documents_checked: Vec<String>,
    #[serde(default)]
    pub discrepancies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualificationPayload {
    pub eligible: bool,
    /// Proposed fixed obligation to income ratio, a non-negative fraction
    pub foir: f64,
    /// Eligibility strength in [0, 100]
    pub qualification_score: f64,
    pub applicant_age: u32,
    pub employment_years: f64,
    pub monthly_income: f64,
    #[serde(default)]
    pub max_eligible_amount: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssessmentPayload {
    pub cibil_score: u32,
    /// Credit risk in [0, 100], lower is better
    pub risk_score: f64,
    pub risk_tier: RiskTier,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValuationPayload {
    pub market_value: f64,
    pub loan_amount: f64,
    /// Loan-to-value ratio as a fraction; above 1 when the loan exceeds the value
    pub ltv: f64,
    pub collateral_type: CollateralType,
    #[serde(default)]
    pub forced_sale_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferPayload {
    pub offer: Option<LoanOffer>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunicationPayload {
    pub channels: Vec<String>,
    pub delivered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditPayload {
    pub compliant: bool,
    #[serde(default)]
    pub findings: Vec<String>,
}

/// Typed stage output. The variant always corresponds to the stage that
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StagePayload {
    Intake(IntakePayload),
    DocumentVerification(DocumentVerificationPayload),
    Qualification(QualificationPayload),
    Assessment(AssessmentPayload),
    Valuation(ValuationPayload),
    Underwriting(UnderwritingVerdict),
    Offer(OfferPayload),
    Communication(CommunicationPayload),
    Audit(AuditPayload),
    Empty,
}

fn parse_payload<T: DeserializeOwned>(stage: Stage, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        OrchestrationError::CapabilitySchemaError(format!(
            "{} output does not match schema: {}",
            stage.as_str(),
            e
        ))
    })
}

fn require_range(stage: Stage, field: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(OrchestrationError::CapabilitySchemaError(format!(
            "{}.{} = {} outside [{}, {}]",
            stage.as_str(),
            field,
            value,
            min,
            max
        )))
    }
}

impl StagePayload {
    /// Validate raw capability output against the schema of `stage`.
    pub fn from_output(stage: Stage, value: Value) -> Result<Self> {
        let payload = match stage {
            Stage::CustomerService => StagePayload::Intake(parse_payload(stage, value)?),
            Stage::DocumentVerification => {
                let p: DocumentVerificationPayload = parse_payload(stage, value)?;
                require_range(stage, "document_score", p.document_score, 0.0, 100.0)?;
                StagePayload::DocumentVerification(p)
            }
            Stage::CreditQualification => {
                let p: QualificationPayload = parse_payload(stage, value)?;
                require_range(stage, "foir", p.foir, 0.0, f64::MAX)?;
                require_range(stage, "qualification_score", p.qualification_score, 0.0, 100.0)?;
                require_range(stage, "employment_years", p.employment_years, 0.0, 80.0)?;
                if let Some(max) = p.max_eligible_amount {
                    require_range(stage, "max_eligible_amount", max, 0.0, f64::MAX)?;
                }
                StagePayload::Qualification(p)
            }
            Stage::CreditAssessment => {
                let p: AssessmentPayload = parse_payload(stage, value)?;
                require_range(stage, "risk_score", p.risk_score, 0.0, 100.0)?;
                require_range(stage, "cibil_score", p.cibil_score as f64, 300.0, 900.0)?;
                StagePayload::Assessment(p)
            }
            Stage::AssetValuation => {
                let p: ValuationPayload = parse_payload(stage, value)?;
                require_range(stage, "market_value", p.market_value, f64::MIN_POSITIVE, f64::MAX)?;
                require_range(stage, "loan_amount", p.loan_amount, 0.0, f64::MAX)?;
                require_range(stage, "ltv", p.ltv, 0.0, f64::MAX)?;
                // A percentage LTV is off from the implied ratio by a factor of 100
                let implied = p.loan_amount / p.market_value;
                if (p.ltv - implied).abs() > (implied * 0.01).max(1e-3) {
                    return Err(OrchestrationError::CapabilitySchemaError(format!(
                        "{}.ltv = {} does not match loan_amount / market_value = {:.4}",
                        stage.as_str(),
                        p.ltv,
                        implied
                    )));
                }
                StagePayload::Valuation(p)
            }
            Stage::CustomerCommunication => {
                StagePayload::Communication(parse_payload(stage, value)?)
            }
            Stage::Audit => StagePayload::Audit(parse_payload(stage, value)?),
            Stage::Underwriting | Stage::OfferGeneration => {
                return Err(OrchestrationError::CapabilitySchemaError(format!(
                    "{} is computed by the orchestrator, not a capability",
                    stage.as_str()
                )))
            }
        };

        Ok(payload)
    }
}

//
// ================= Stage Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
    pub payload: StagePayload,
    pub rationale: String,
    #[serde(default)]
    pub failure: Option<FailureCode>,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    pub fn succeeded(stage: Stage, payload: StagePayload, rationale: String, elapsed_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Succeeded,
            payload,
            rationale,
            failure: None,
            elapsed_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(stage: Stage, code: FailureCode, reason: String, elapsed_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            payload: StagePayload::Empty,
            rationale: reason,
            failure: Some(code),
            elapsed_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}

//
// ================= Underwriting =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Approve,
    Decline,
    Referred,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Approve => "APPROVE",
            Decision::Decline => "DECLINE",
            Decision::Referred => "REFERRED",
        };
        write!(f, "{}", s)
    }
}

/// Normalized component scores, each in [0, 100], higher is better
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ComponentScores {
    pub document: f64,
    pub qualification: f64,
    pub credit: f64,
    pub risk: f64,
    pub ltv: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreWeights {
    pub document: f64,
    pub qualification: f64,
    pub credit: f64,
    pub risk: f64,
    pub ltv: f64,
}

impl ScoreWeights {
    pub const STANDARD: ScoreWeights = ScoreWeights {
        document: 0.15,
        qualification: 0.20,
        credit: 0.25,
        risk: 0.20,
        ltv: 0.20,
    };

    pub fn sum(&self) -> f64 {
        self.document + self.qualification + self.credit + self.risk + self.ltv
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::STANDARD
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyCheck {
    pub policy: String,
    pub passed: bool,
    pub value: String,
    pub limit: String,
    /// Gating checks force a DECLINE when they fail
    pub gating: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAuthority {
    Standard,
    SeniorManagement,
    CreditCommittee,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnderwritingVerdict {
    pub decision: Decision,
    pub composite_score: f64,
    pub components: ComponentScores,
    pub weights: ScoreWeights,
    /// Annual rate in percent; absent for DECLINE
    pub interest_rate: Option<f64>,
    pub policy_checks: Vec<PolicyCheck>,
    pub approval_authority: ApprovalAuthority,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub covenants: Vec<String>,
    pub rationale: String,
}

//
// ================= Offer =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AmortizationEntry {
    pub period: u32,
    pub payment: f64,
    pub principal: f64,
    pub interest: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeeCategory {
    Processing,
    Documentation,
    Legal,
    Valuation,
    StampDuty,
    Registration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeeItem {
    pub category: FeeCategory,
    /// Fraction of principal
    pub rate: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoanOffer {
    pub offer_reference: String,
    pub principal: f64,
    pub tenure_years: u32,
    pub tenure_months: u32,
    pub annual_rate: f64,
    pub effective_annual_rate: f64,
    pub emi: f64,
    pub schedule: Vec<AmortizationEntry>,
    pub total_interest: f64,
    pub fees: Vec<FeeItem>,
    pub total_fees: f64,
    /// Principal + interest + fees
    pub total_cost: f64,
    pub offer_date: NaiveDate,
    pub valid_until: NaiveDate,
    pub first_emi_date: NaiveDate,
}

//
// ================= Pipeline Run =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub code: FailureCode,
    pub reason: String,
    /// Branch results that completed but were not merged because the join failed
    #[serde(default)]
    pub unmerged: Vec<StageResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub request: LoanApplicationRequest,
    pub state: RunState,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    pub handoff: String,
    pub verdict: Option<UnderwritingVerdict>,
    pub offer: Option<LoanOffer>,
    pub failure: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(request: LoanApplicationRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            request,
            state: RunState::Pending,
            status: RunStatus::InProgress,
            stages: Vec::new(),
            handoff: String::new(),
            verdict: None,
            offer: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().find(|r| r.stage == stage)
    }
}
