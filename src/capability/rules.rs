//! Rule-based stage capabilities
//!
//! Deterministic in-process agents used when no remote stage service is
//! configured. Missing applicant facts fall back to the defaults below.

use super::{CapabilityRegistry, CapabilityRequest, StageCapability, StageOutput};
use crate::error::OrchestrationError;
use crate::finance;
use crate::models::{
    AssessmentPayload, AuditPayload, CollateralType, CommunicationPayload, ConstructionQuality,
    Decision, DocumentVerificationPayload, IntakePayload, LocationTier, PropertyDetails,
    QualificationPayload, RiskTier, Stage, StagePayload, ValuationPayload,
};
use crate::Result;
use std::sync::Arc;

const DEFAULT_AGE: u32 = 35;
const DEFAULT_MONTHLY_INCOME: f64 = 150_000.0;
const DEFAULT_EMPLOYMENT_YEARS: f64 = 5.0;
const DEFAULT_CIBIL: u32 = 750;

// Bureau attributes not carried in the application
const PAYMENT_HISTORY_SCORE: f64 = 92.0;
const CREDIT_UTILIZATION_PCT: f64 = 32.0;
const CREDIT_HISTORY_YEARS: f64 = 8.0;
const RECENT_INQUIRIES: f64 = 2.0;

/// Rate used to size the proposed EMI before underwriting prices the loan
const INDICATIVE_RATE: f64 = 8.5;
const MIN_MONTHLY_INCOME: f64 = 25_000.0;
const MAX_FOIR: f64 = 0.60;
const MIN_AGE: u32 = 21;
const MAX_AGE: u32 = 65;
const MIN_EMPLOYMENT_YEARS: f64 = 2.0;

const REQUIRED_DOCUMENTS: usize = 5;
const FORCED_SALE_RATIO: f64 = 0.75;

fn output(payload: StagePayload, rationale: String, summary: String) -> Result<StageOutput> {
    let payload = match payload {
        StagePayload::Intake(p) => serde_json::to_value(p)?,
        StagePayload::DocumentVerification(p) => serde_json::to_value(p)?,
        StagePayload::Qualification(p) => serde_json::to_value(p)?,
        StagePayload::Assessment(p) => serde_json::to_value(p)?,
        StagePayload::Valuation(p) => serde_json::to_value(p)?,
        StagePayload::Communication(p) => serde_json::to_value(p)?,
        StagePayload::Audit(p) => serde_json::to_value(p)?,
        other => serde_json::to_value(other)?,
    };

    Ok(StageOutput {
        payload,
        rationale,
        summary: Some(summary),
    })
}

//
// ================= Customer Service =================
//

pub struct IntakeCapability;

#[async_trait::async_trait]
impl StageCapability for IntakeCapability {
    fn stage(&self) -> Stage {
        Stage::CustomerService
    }

    fn description(&self) -> &'static str {
        "Capture the application and list missing applicant facts"
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<StageOutput> {
        let facts = &request.facts;
        let profile = &facts.profile;

        let mut missing_items = Vec::new();
        if profile.age.is_none() {
            missing_items.push("age".to_string());
        }
        if profile.monthly_income.is_none() {
            missing_items.push("monthly_income".to_string());
        }
        if profile.employment_years.is_none() {
            missing_items.push("employment_years".to_string());
        }
        if profile.property.is_none() {
            missing_items.push("property".to_string());
        }
        if facts.contact_number.is_none() && facts.email.is_none() {
            missing_items.push("contact".to_string());
        }

        let application_complete = missing_items.is_empty();
        let rationale = if application_complete {
            "All applicant facts captured".to_string()
        } else {
            format!("Proceeding with defaults for: {}", missing_items.join(", "))
        };
        let summary = format!(
            "{} applied for {} of Rs {:.0} over {} years",
            facts.customer_name, facts.loan_purpose, facts.loan_amount, facts.tenure_years
        );

        output(
            StagePayload::Intake(IntakePayload {
                application_complete,
                missing_items,
            }),
            rationale,
            summary,
        )
    }
}

//
// ================= Document Verification =================
//

pub struct DocumentVerificationCapability;

#[async_trait::async_trait]
impl StageCapability for DocumentVerificationCapability {
    fn stage(&self) -> Stage {
        Stage::DocumentVerification
    }

    fn description(&self) -> &'static str {
        "Score document completeness against the required KYC set"
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<StageOutput> {
        let documents = &request.facts.profile.document_ids;
        if documents.is_empty() {
            return Err(OrchestrationError::StageRejected(
                "no documents supplied for verification".to_string(),
            ));
        }

        let mut unique: Vec<String> = documents.clone();
        unique.sort();
        unique.dedup();

        let mut discrepancies = Vec::new();
        if unique.len() < documents.len() {
            discrepancies.push("duplicate document references".to_string());
        }
        if unique.len() < REQUIRED_DOCUMENTS {
            discrepancies.push(format!(
                "{} of {} required documents supplied",
                unique.len(),
                REQUIRED_DOCUMENTS
            ));
        }

        let supplied = unique.len().min(REQUIRED_DOCUMENTS) as f64;
        let document_score = supplied / REQUIRED_DOCUMENTS as f64 * 100.0;
        let verified = document_score >= 60.0;

        output(
            StagePayload::DocumentVerification(DocumentVerificationPayload {
                verified,
                document_score,
                documents_checked: unique,
                discrepancies,
            }),
            format!("Document completeness {:.0}%", document_score),
            format!(
                "Documents {} with score {:.0}",
                if verified { "verified" } else { "incomplete" },
                document_score
            ),
        )
    }
}

//
// ================= Credit Qualification =================
//

pub struct QualificationCapability;

#[async_trait::async_trait]
impl StageCapability for QualificationCapability {
    fn stage(&self) -> Stage {
        Stage::CreditQualification
    }

    fn description(&self) -> &'static str {
        "Check age, income, FOIR and borrowing capacity"
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<StageOutput> {
        let facts = &request.facts;
        let profile = &facts.profile;

        let age = profile.age.unwrap_or(DEFAULT_AGE);
        let income = profile.monthly_income.unwrap_or(DEFAULT_MONTHLY_INCOME);
        let existing_emis = profile.existing_emis.unwrap_or(0.0).max(0.0);
        let employment_years = profile.employment_years.unwrap_or(DEFAULT_EMPLOYMENT_YEARS);

        let tenure_months = facts.tenure_years.checked_mul(12).ok_or_else(|| {
            OrchestrationError::InvalidInput(format!(
                "tenure of {} years is out of range",
                facts.tenure_years
            ))
        })?;
        let proposed_emi = finance::emi(facts.loan_amount, INDICATIVE_RATE, tenure_months)?;
        let foir = finance::foir(existing_emis + proposed_emi, income)?;

        let max_tenure = finance::max_tenure_years(age);
        let capacity = if max_tenure == 0 {
            0.0
        } else {
            finance::borrowing_capacity(income, existing_emis, INDICATIVE_RATE, max_tenure * 12)?
        };

        let checks = [
            ("age", (MIN_AGE..=MAX_AGE).contains(&age)),
            ("income", income >= MIN_MONTHLY_INCOME),
            ("foir", foir <= MAX_FOIR),
            ("employment", employment_years >= MIN_EMPLOYMENT_YEARS),
            ("capacity", capacity > 0.0),
        ];
        let passed = checks.iter().filter(|(_, ok)| *ok).count();
        let failed: Vec<&str> = checks.iter().filter(|(_, ok)| !*ok).map(|(name, _)| *name).collect();

        let qualification_score = passed as f64 / checks.len() as f64 * 100.0;
        let eligible = passed >= 3;

        let rationale = if failed.is_empty() {
            format!("All {} eligibility checks passed", checks.len())
        } else {
            format!("Failed checks: {}", failed.join(", "))
        };

        output(
            StagePayload::Qualification(QualificationPayload {
                eligible,
                foir,
                qualification_score,
                applicant_age: age,
                employment_years,
                monthly_income: income,
                max_eligible_amount: Some(capacity),
            }),
            rationale,
            format!(
                "{} at FOIR {:.2}; capacity Rs {:.0}",
                if eligible { "Qualified" } else { "Not qualified" },
                foir,
                capacity
            ),
        )
    }
}

//
// ================= Credit Assessment =================
//

pub struct CreditAssessmentCapability;

/// Weighted bureau risk, lower is better
fn credit_risk_score(cibil: u32) -> f64 {
    let score_component = ((cibil as f64 - 300.0) / 6.0).clamp(0.0, 100.0);
    let utilization_component = (100.0 - CREDIT_UTILIZATION_PCT * 1.5).max(0.0);
    let history_component = (CREDIT_HISTORY_YEARS * 12.0).min(100.0);
    let inquiry_component = (100.0 - RECENT_INQUIRIES * 15.0).max(0.0);

    let weighted = score_component * 0.35
        + PAYMENT_HISTORY_SCORE * 0.25
        + utilization_component * 0.20
        + history_component * 0.10
        + inquiry_component * 0.10;

    finance::round_to_minor_unit((100.0 - weighted).clamp(0.0, 100.0))
}

fn risk_tier(risk_score: f64) -> RiskTier {
    if risk_score <= 20.0 {
        RiskTier::Low
    } else if risk_score <= 40.0 {
        RiskTier::Medium
    } else if risk_score <= 60.0 {
        RiskTier::High
    } else {
        RiskTier::VeryHigh
    }
}

#[async_trait::async_trait]
impl StageCapability for CreditAssessmentCapability {
    fn stage(&self) -> Stage {
        Stage::CreditAssessment
    }

    fn description(&self) -> &'static str {
        "Score bureau risk from the CIBIL report"
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<StageOutput> {
        let cibil = request.facts.profile.cibil_score.unwrap_or(DEFAULT_CIBIL);
        if !(300..=900).contains(&cibil) {
            return Err(OrchestrationError::InvalidInput(format!(
                "CIBIL score {} outside 300-900",
                cibil
            )));
        }

        let risk_score = credit_risk_score(cibil);
        let tier = risk_tier(risk_score);

        let mut risk_factors = Vec::new();
        if cibil < 700 {
            risk_factors.push("Credit score below optimal range".to_string());
        }
        if CREDIT_UTILIZATION_PCT > 50.0 {
            risk_factors.push("High credit utilization".to_string());
        }
        if RECENT_INQUIRIES > 3.0 {
            risk_factors.push("Multiple recent credit inquiries".to_string());
        }

        output(
            StagePayload::Assessment(AssessmentPayload {
                cibil_score: cibil,
                risk_score,
                risk_tier: tier,
                risk_factors,
            }),
            format!("CIBIL {} gives risk score {:.1}", cibil, risk_score),
            format!("Credit risk {:?} ({:.1})", tier, risk_score),
        )
    }
}

//
// ================= Asset Valuation =================
//

pub struct AssetValuationCapability;

/// Market value rounded to the nearest thousand
pub fn market_value(property: &PropertyDetails) -> f64 {
    let rate_per_sqft = match property.location {
        LocationTier::Metro => 8000.0,
        LocationTier::Tier1 => 6000.0,
        LocationTier::Tier2 => 4000.0,
        LocationTier::Tier3 => 2500.0,
    };
    let type_multiplier = match property.collateral_type {
        CollateralType::Residential => 1.0,
        CollateralType::Commercial => 1.2,
        CollateralType::Industrial => 0.8,
        CollateralType::Plot => 0.7,
        CollateralType::MixedUse => 1.1,
    };
    let quality_multiplier = match property.construction_quality {
        ConstructionQuality::Excellent => 1.2,
        ConstructionQuality::Good => 1.0,
        ConstructionQuality::Average => 0.85,
        ConstructionQuality::BelowAverage => 0.7,
    };
    // 1% a year, capped at 15%
    let depreciation = (property.age_years as f64 * 0.01).min(0.15);

    let value = property.built_up_area_sqft
        * rate_per_sqft
        * type_multiplier
        * quality_multiplier
        * (1.0 - depreciation);

    (value / 1000.0).round() * 1000.0
}

#[async_trait::async_trait]
impl StageCapability for AssetValuationCapability {
    fn stage(&self) -> Stage {
        Stage::AssetValuation
    }

    fn description(&self) -> &'static str {
        "Value the collateral and compute LTV"
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<StageOutput> {
        let property = request.facts.profile.property.clone().unwrap_or_default();
        if !property.clear_title {
            return Err(OrchestrationError::StageRejected(
                "collateral title is encumbered".to_string(),
            ));
        }

        let value = market_value(&property);
        if value <= 0.0 {
            return Err(OrchestrationError::InvalidInput(
                "property has no assessable value".to_string(),
            ));
        }

        let loan_amount = request.facts.loan_amount;
        let ltv = finance::ltv(loan_amount, value)?;

        let forced_sale_value = (value * FORCED_SALE_RATIO / 1000.0).round() * 1000.0;

        output(
            StagePayload::Valuation(ValuationPayload {
                market_value: value,
                loan_amount,
                ltv,
                collateral_type: property.collateral_type,
                forced_sale_value: Some(forced_sale_value),
            }),
            format!("Market value Rs {:.0}, forced sale Rs {:.0}", value, forced_sale_value),
            format!("Collateral valued at Rs {:.0}; LTV {:.2}", value, ltv),
        )
    }
}

//
// ================= Customer Communication =================
//

pub struct CommunicationCapability;

#[async_trait::async_trait]
impl StageCapability for CommunicationCapability {
    fn stage(&self) -> Stage {
        Stage::CustomerCommunication
    }

    fn description(&self) -> &'static str {
        "Notify the customer of the decision on every available channel"
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<StageOutput> {
        let facts = &request.facts;

        let mut channels = Vec::new();
        if facts.email.as_deref().is_some_and(|e| !e.trim().is_empty()) {
            channels.push("email".to_string());
        }
        if facts.contact_number.as_deref().is_some_and(|c| !c.trim().is_empty()) {
            channels.push("sms".to_string());
        }
        if channels.is_empty() {
            return Err(OrchestrationError::StageRejected(
                "no contact channel for customer".to_string(),
            ));
        }

        let decision = request
            .context
            .verdict()
            .map(|v| v.decision.to_string())
            .unwrap_or_else(|| "PENDING".to_string());

        output(
            StagePayload::Communication(CommunicationPayload {
                channels: channels.clone(),
                delivered: true,
            }),
            format!("Decision {} sent via {}", decision, channels.join(", ")),
            format!("Customer notified of {}", decision),
        )
    }
}

//
// ================= Audit =================
//

pub struct AuditCapability;

#[async_trait::async_trait]
impl StageCapability for AuditCapability {
    fn stage(&self) -> Stage {
        Stage::Audit
    }

    fn description(&self) -> &'static str {
        "Check every prior stage left a complete record"
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<StageOutput> {
        let context = &request.context;

        let mut findings: Vec<String> = Stage::ORDER
            .iter()
            .filter(|s| **s != Stage::Audit && context.get(**s).is_none())
            .map(|s| format!("missing {} record", s.as_str()))
            .collect();

        if let Some(verdict) = context.verdict() {
            let failed_gates = verdict.policy_checks.iter().filter(|c| c.gating && !c.passed).count();
            if verdict.decision == Decision::Approve && failed_gates > 0 {
                findings.push("approval granted despite failed hard gate".to_string());
            }

            let offered = matches!(
                context.get(Stage::OfferGeneration).map(|r| &r.payload),
                Some(StagePayload::Offer(p)) if p.offer.is_some()
            );
            if verdict.decision == Decision::Approve && !offered {
                findings.push("approved application has no offer".to_string());
            }
            if verdict.decision != Decision::Approve && offered {
                findings.push("offer issued without approval".to_string());
            }
        }

        if context.handoff().trim().is_empty() {
            findings.push("handoff narrative is empty".to_string());
        }

        let compliant = findings.is_empty();
        let rationale = if compliant {
            format!("{} stage records verified", context.results().len())
        } else {
            format!("{} finding(s) raised", findings.len())
        };

        output(
            StagePayload::Audit(AuditPayload {
                compliant,
                findings,
            }),
            rationale,
            format!("Audit {}", if compliant { "passed" } else { "raised findings" }),
        )
    }
}

/// Registry with the in-process agents for every external stage
pub fn create_rule_based_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();

    registry.register(Arc::new(IntakeCapability));
    registry.register(Arc::new(DocumentVerificationCapability));
    registry.register(Arc::new(QualificationCapability));
    registry.register(Arc::new(CreditAssessmentCapability));
    registry.register(Arc::new(AssetValuationCapability));
    registry.register(Arc::new(CommunicationCapability));
    registry.register(Arc::new(AuditCapability));

    registry
}
