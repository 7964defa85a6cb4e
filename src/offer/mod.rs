//! Offer generation
//!
//! Turns an APPROVE verdict into priced loan terms. Any other verdict
//! produces an empty offer carrying the reason.

use crate::error::OrchestrationError;
use crate::finance::{self, round_to_minor_unit, AmortizationSchedule};
use crate::models::{
    AmortizationEntry, Decision, LoanApplicationRequest, LoanOffer, OfferPayload,
    QualificationPayload, UnderwritingVerdict,
};
use crate::Result;
use chrono::{Days, NaiveDate};
use tracing::debug;
use uuid::Uuid;

pub const OFFER_VALIDITY_DAYS: u64 = 30;
pub const FIRST_EMI_AFTER_DAYS: u64 = 45;

#[derive(Debug, Clone, Default)]
pub struct OfferGenerator;

impl OfferGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(
        &self,
        run_id: Uuid,
        request: &LoanApplicationRequest,
        verdict: &UnderwritingVerdict,
        qualification: &QualificationPayload,
        offer_date: NaiveDate,
    ) -> Result<OfferPayload> {
        if verdict.decision != Decision::Approve {
            return Ok(OfferPayload {
                offer: None,
                reason: Some(format!("No offer for {} verdict", verdict.decision)),
            });
        }

        let annual_rate = verdict.interest_rate.ok_or_else(|| {
            OrchestrationError::InvalidInput("approved verdict carries no interest rate".to_string())
        })?;

        let principal = round_to_minor_unit(
            qualification
                .max_eligible_amount
                .map_or(request.loan_amount, |max| request.loan_amount.min(max)),
        );
        let tenure_years = request
            .tenure_years
            .min(finance::max_tenure_years(qualification.applicant_age));

        if principal <= 0.0 || tenure_years == 0 {
            return Ok(OfferPayload {
                offer: None,
                reason: Some(format!(
                    "No serviceable terms: principal {:.2}, tenure {} years",
                    principal, tenure_years
                )),
            });
        }

        let tenure_months = tenure_years * 12;
        let schedule = AmortizationSchedule::new(principal, annual_rate, tenure_months)?;
        let entries: Vec<AmortizationEntry> = schedule.iter().collect();
        let total_interest = round_to_minor_unit(entries.iter().map(|e| e.interest).sum());

        let fees = finance::fee_structure(principal)?;
        let total_fees = round_to_minor_unit(fees.iter().map(|f| f.amount).sum());

        let valid_until = add_days(offer_date, OFFER_VALIDITY_DAYS)?;
        let first_emi_date = add_days(offer_date, FIRST_EMI_AFTER_DAYS)?;

        let run_ref = run_id.simple().to_string();
        let offer_reference = format!(
            "OFR-{}-{}",
            offer_date.format("%Y%m%d"),
            &run_ref[..8].to_uppercase()
        );

        debug!(
            run_id = %run_id,
            principal,
            annual_rate,
            tenure_months,
            "Offer priced"
        );

        let offer = LoanOffer {
            offer_reference,
            principal,
            tenure_years,
            tenure_months,
            annual_rate,
            effective_annual_rate: round_to_minor_unit(finance::effective_annual_rate(annual_rate)?),
            emi: schedule.emi(),
            schedule: entries,
            total_interest,
            fees,
            total_fees,
            total_cost: round_to_minor_unit(principal + total_interest + total_fees),
            offer_date,
            valid_until,
            first_emi_date,
        };

        let reason = if principal < request.loan_amount || tenure_years < request.tenure_years {
            Some("Terms reduced to eligible principal and tenure".to_string())
        } else {
            None
        };

        Ok(OfferPayload {
            offer: Some(offer),
            reason,
        })
    }
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate> {
    date.checked_add_days(Days::new(days)).ok_or_else(|| {
        OrchestrationError::InvalidInput(format!("date {} + {} days out of range", date, days))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApplicantProfile, ApprovalAuthority, ComponentScores, ScoreWeights};

    fn request() -> LoanApplicationRequest {
        LoanApplicationRequest {
            customer_name: "Kala Divan".to_string(),
            loan_amount: 4_000_000.0,
            loan_purpose: "Home Loan".to_string(),
            tenure_years: 20,
            contact_number: None,
            email: None,
            profile: ApplicantProfile::default(),
        }
    }

    fn verdict(decision: Decision, rate: Option<f64>) -> UnderwritingVerdict {
        UnderwritingVerdict {
            decision,
            composite_score: 82.0,
            components: ComponentScores {
                document: 100.0,
                qualification: 90.0,
                credit: 70.0,
                risk: 82.5,
                ltv: 75.0,
            },
            weights: ScoreWeights::STANDARD,
            interest_rate: rate,
            policy_checks: vec![],
            approval_authority: ApprovalAuthority::Standard,
            conditions: vec![],
            covenants: vec![],
            rationale: String::new(),
        }
    }

    fn qualification(age: u32, max: Option<f64>) -> QualificationPayload {
        QualificationPayload {
            eligible: true,
            foir: 0.3,
            qualification_score: 100.0,
            applicant_age: age,
            employment_years: 5.0,
            monthly_income: 150_000.0,
            max_eligible_amount: max,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[test]
    fn test_approved_offer_terms() {
        let payload = OfferGenerator::new()
            .generate(
                Uuid::new_v4(),
                &request(),
                &verdict(Decision::Approve, Some(9.0)),
                &qualification(30, Some(9_000_000.0)),
                date(),
            )
            .unwrap();

        let offer = payload.offer.unwrap();
        assert!(payload.reason.is_none());
        assert_eq!(offer.principal, 4_000_000.0);
        assert_eq!(offer.tenure_months, 240);
        assert!((offer.emi - 35_989.04).abs() < 0.01);
        assert_eq!(offer.schedule.len(), 240);
        assert_eq!(offer.total_fees, 40_000.0);
        assert_eq!(offer.valid_until, NaiveDate::from_ymd_opt(2024, 2, 14).unwrap());
        assert_eq!(offer.first_emi_date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert!(offer.offer_reference.starts_with("OFR-20240115-"));
        assert!(
            (offer.total_cost - (offer.principal + offer.total_interest + offer.total_fees)).abs() < 0.01
        );
    }

    #[test]
    fn test_terms_capped_by_capacity_and_age() {
        let payload = OfferGenerator::new()
            .generate(
                Uuid::new_v4(),
                &request(),
                &verdict(Decision::Approve, Some(8.86)),
                &qualification(58, Some(2_500_000.0)),
                date(),
            )
            .unwrap();

        let offer = payload.offer.unwrap();
        assert_eq!(offer.principal, 2_500_000.0);
        assert_eq!(offer.tenure_years, 12);
        assert!(payload.reason.is_some());
    }

    #[test]
    fn test_no_offer_without_approval() {
        for decision in [Decision::Decline, Decision::Referred] {
            let payload = OfferGenerator::new()
                .generate(
                    Uuid::new_v4(),
                    &request(),
                    &verdict(decision, Some(10.5)),
                    &qualification(30, None),
                    date(),
                )
                .unwrap();
            assert!(payload.offer.is_none());
            assert!(payload.reason.unwrap().contains(&decision.to_string()));
        }
    }

    #[test]
    fn test_approval_without_rate_is_invalid() {
        let result = OfferGenerator::new().generate(
            Uuid::new_v4(),
            &request(),
            &verdict(Decision::Approve, None),
            &qualification(30, None),
            date(),
        );
        assert!(matches!(result, Err(OrchestrationError::InvalidInput(_))));
    }
}
