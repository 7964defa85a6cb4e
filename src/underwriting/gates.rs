//! Underwriting hard gates and lending policies
//!
//! Gating rules force a DECLINE when they fail. Non-gating policies only
//! count towards the approval authority and can refer an application.

use crate::models::{
    AssessmentPayload, CollateralType, PolicyCheck, QualificationPayload, ValuationPayload,
};
use tracing::debug;

pub const MIN_AGE: u32 = 21;
pub const MAX_AGE: u32 = 65;
pub const MIN_EMPLOYMENT_YEARS: f64 = 2.0;
pub const MIN_CIBIL: u32 = 650;
pub const MAX_FOIR: f64 = 0.60;
pub const MAX_RESIDENTIAL_LTV: f64 = 0.80;
/// Rs 5 crore
pub const MAX_LOAN_AMOUNT: f64 = 50_000_000.0;

/// Stage outputs a gate may inspect
#[derive(Debug, Clone, Copy)]
pub struct GateInputs<'a> {
    pub qualification: &'a QualificationPayload,
    pub assessment: &'a AssessmentPayload,
    pub valuation: &'a ValuationPayload,
}

/// Trait for underwriting policy rules
pub trait HardGate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether failing this rule declines the application outright
    fn gating(&self) -> bool {
        true
    }

    fn check(&self, inputs: &GateInputs<'_>) -> GateOutcome;
}

pub struct GateOutcome {
    pub passed: bool,
    pub value: String,
    pub limit: String,
}

/// Evaluates every registered rule, in registration order
pub struct GateEngine {
    gates: Vec<Box<dyn HardGate>>,
}

impl GateEngine {
    pub fn new() -> Self {
        Self { gates: Vec::new() }
    }

    pub fn add_gate(&mut self, gate: Box<dyn HardGate>) {
        self.gates.push(gate);
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Run all rules. Evaluation never stops early so the verdict carries a
    /// full policy record.
    pub fn evaluate(&self, inputs: &GateInputs<'_>) -> Vec<PolicyCheck> {
        let checks: Vec<PolicyCheck> = self
            .gates
            .iter()
            .map(|gate| {
                let outcome = gate.check(inputs);
                PolicyCheck {
                    policy: gate.name().to_string(),
                    passed: outcome.passed,
                    value: outcome.value,
                    limit: outcome.limit,
                    gating: gate.gating(),
                }
            })
            .collect();

        debug!(
            gate_count = checks.len(),
            failed = checks.iter().filter(|c| !c.passed).count(),
            "Policy gates evaluated"
        );

        checks
    }
}

impl Default for GateEngine {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Gates =================
//

pub struct AgeGate;

impl HardGate for AgeGate {
    fn name(&self) -> &'static str {
        "Age Eligibility"
    }

    fn check(&self, inputs: &GateInputs<'_>) -> GateOutcome {
        let age = inputs.qualification.applicant_age;
        GateOutcome {
            passed: (MIN_AGE..=MAX_AGE).contains(&age),
            value: age.to_string(),
            limit: format!("{}-{}", MIN_AGE, MAX_AGE),
        }
    }
}

pub struct EmploymentTenureGate;

impl HardGate for EmploymentTenureGate {
    fn name(&self) -> &'static str {
        "Minimum Employment Tenure"
    }

    fn check(&self, inputs: &GateInputs<'_>) -> GateOutcome {
        let years = inputs.qualification.employment_years;
        GateOutcome {
            passed: years >= MIN_EMPLOYMENT_YEARS,
            value: format!("{:.1} years", years),
            limit: format!(">= {:.0} years", MIN_EMPLOYMENT_YEARS),
        }
    }
}

pub struct CreditScoreGate;

impl HardGate for CreditScoreGate {
    fn name(&self) -> &'static str {
        "Minimum Credit Score"
    }

    fn check(&self, inputs: &GateInputs<'_>) -> GateOutcome {
        let cibil = inputs.assessment.cibil_score;
        GateOutcome {
            passed: cibil >= MIN_CIBIL,
            value: cibil.to_string(),
            limit: format!(">= {}", MIN_CIBIL),
        }
    }
}

pub struct FoirGate;

impl HardGate for FoirGate {
    fn name(&self) -> &'static str {
        "Maximum FOIR"
    }

    fn check(&self, inputs: &GateInputs<'_>) -> GateOutcome {
        let foir = inputs.qualification.foir;
        GateOutcome {
            passed: foir <= MAX_FOIR,
            value: format!("{:.2}", foir),
            limit: format!("<= {:.2}", MAX_FOIR),
        }
    }
}

/// LTV ceiling, applied to residential collateral only
pub struct ResidentialLtvGate;

impl HardGate for ResidentialLtvGate {
    fn name(&self) -> &'static str {
        "LTV Limit"
    }

    fn check(&self, inputs: &GateInputs<'_>) -> GateOutcome {
        let ltv = inputs.valuation.ltv;
        if inputs.valuation.collateral_type != CollateralType::Residential {
            return GateOutcome {
                passed: true,
                value: format!("{:.2}", ltv),
                limit: "not applicable".to_string(),
            };
        }

        GateOutcome {
            passed: ltv <= MAX_RESIDENTIAL_LTV,
            value: format!("{:.2}", ltv),
            limit: format!("<= {:.2}", MAX_RESIDENTIAL_LTV),
        }
    }
}

pub struct MaxLoanAmountPolicy;

impl HardGate for MaxLoanAmountPolicy {
    fn name(&self) -> &'static str {
        "Maximum Loan Amount"
    }

    fn gating(&self) -> bool {
        false
    }

    fn check(&self, inputs: &GateInputs<'_>) -> GateOutcome {
        let amount = inputs.valuation.loan_amount;
        GateOutcome {
            passed: amount <= MAX_LOAN_AMOUNT,
            value: format!("{:.0}", amount),
            limit: format!("<= {:.0}", MAX_LOAN_AMOUNT),
        }
    }
}

/// Create the standard underwriting gate set
pub fn create_default_gate_engine() -> GateEngine {
    let mut engine = GateEngine::new();

    engine.add_gate(Box::new(AgeGate));
    engine.add_gate(Box::new(EmploymentTenureGate));
    engine.add_gate(Box::new(CreditScoreGate));
    engine.add_gate(Box::new(FoirGate));
    engine.add_gate(Box::new(ResidentialLtvGate));
    engine.add_gate(Box::new(MaxLoanAmountPolicy));

    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskTier;

    fn payloads() -> (QualificationPayload, AssessmentPayload, ValuationPayload) {
        (
            QualificationPayload {
                eligible: true,
                foir: 0.40,
                qualification_score: 90.0,
                applicant_age: 30,
                employment_years: 5.0,
                monthly_income: 150_000.0,
                max_eligible_amount: None,
            },
            AssessmentPayload {
                cibil_score: 720,
                risk_score: 20.0,
                risk_tier: RiskTier::Low,
                risk_factors: vec![],
            },
            ValuationPayload {
                market_value: 5_000_000.0,
                loan_amount: 3_500_000.0,
                ltv: 0.70,
                collateral_type: CollateralType::Residential,
                forced_sale_value: None,
            },
        )
    }

    #[test]
    fn test_all_gates_pass_for_clean_application() {
        let (q, a, v) = payloads();
        let checks = create_default_gate_engine().evaluate(&GateInputs {
            qualification: &q,
            assessment: &a,
            valuation: &v,
        });

        assert_eq!(checks.len(), 6);
        assert!(checks.iter().all(|c| c.passed));
        assert_eq!(checks.iter().filter(|c| !c.gating).count(), 1);
    }

    #[test]
    fn test_every_gate_is_evaluated_after_failure() {
        let (mut q, mut a, v) = payloads();
        q.applicant_age = 70;
        a.cibil_score = 600;

        let checks = create_default_gate_engine().evaluate(&GateInputs {
            qualification: &q,
            assessment: &a,
            valuation: &v,
        });

        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.policy.as_str())
            .collect();
        assert_eq!(failed, vec!["Age Eligibility", "Minimum Credit Score"]);
        assert_eq!(checks.len(), 6);
    }

    #[test]
    fn test_ltv_gate_only_binds_residential() {
        let (q, a, mut v) = payloads();
        v.ltv = 0.85;

        let inputs = GateInputs {
            qualification: &q,
            assessment: &a,
            valuation: &v,
        };
        assert!(!ResidentialLtvGate.check(&inputs).passed);

        let mut commercial = v.clone();
        commercial.collateral_type = CollateralType::Commercial;
        let inputs = GateInputs {
            qualification: &q,
            assessment: &a,
            valuation: &commercial,
        };
        assert!(ResidentialLtvGate.check(&inputs).passed);
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let (mut q, mut a, mut v) = payloads();
        q.applicant_age = 65;
        q.employment_years = 2.0;
        q.foir = 0.60;
        a.cibil_score = 650;
        v.ltv = 0.80;

        let checks = create_default_gate_engine().evaluate(&GateInputs {
            qualification: &q,
            assessment: &a,
            valuation: &v,
        });
        assert!(checks.iter().all(|c| c.passed));
    }
}
