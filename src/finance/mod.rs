//! Financial calculator
//!
//! Pure, stateless loan arithmetic. Every function is total over its stated
//! domain and returns `InvalidInput` outside it. Ratios are always
//! non-negative fractions, never percentages.

use crate::error::OrchestrationError;
use crate::models::{FeeCategory, FeeItem};
use crate::Result;

pub mod schedule;
pub use schedule::{AmortizationIter, AmortizationSchedule};

/// Fee categories as fractions of principal
pub const FEE_SCHEDULE: [(FeeCategory, f64); 6] = [
    (FeeCategory::Processing, 0.0050),
    (FeeCategory::Documentation, 0.0010),
    (FeeCategory::Legal, 0.0005),
    (FeeCategory::Valuation, 0.0005),
    (FeeCategory::StampDuty, 0.0020),
    (FeeCategory::Registration, 0.0010),
];

/// Sum of all `FEE_SCHEDULE` rates
pub const TOTAL_FEE_RATIO: f64 = 0.01;

/// FOIR used when sizing borrowing capacity
pub const CAPACITY_FOIR: f64 = 0.50;

pub const MAX_TENURE_YEARS: u32 = 30;
pub const MAX_AGE_AT_MATURITY: u32 = 70;

/// Round to the currency minor unit (paisa)
pub fn round_to_minor_unit(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(OrchestrationError::InvalidInput(format!(
            "{} must be positive, got {}",
            name, value
        )))
    }
}

fn require_rate(annual_rate_percent: f64) -> Result<()> {
    if annual_rate_percent.is_finite() && annual_rate_percent >= 0.0 {
        Ok(())
    } else {
        Err(OrchestrationError::InvalidInput(format!(
            "annual rate must be non-negative, got {}",
            annual_rate_percent
        )))
    }
}

fn require_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(OrchestrationError::InvalidInput(format!(
            "{} is not representable for these terms",
            name
        )))
    }
}

pub(crate) fn monthly_rate(annual_rate_percent: f64) -> f64 {
    annual_rate_percent / 1200.0
}

/// Equated monthly installment on a reducing balance, rounded to the minor unit.
///
/// `EMI = P * r / (1 - (1+r)^-n)` with `r = rate / 1200`;
/// degenerates to `P / n` when the rate is zero.
pub fn emi(principal: f64, annual_rate_percent: f64, tenure_months: u32) -> Result<f64> {
    require_positive("principal", principal)?;
    require_rate(annual_rate_percent)?;
    if tenure_months == 0 {
        return Err(OrchestrationError::InvalidInput(
            "tenure_months must be positive".to_string(),
        ));
    }

    let r = monthly_rate(annual_rate_percent);
    let n = tenure_months as f64;

    let raw = if r == 0.0 {
        principal / n
    } else {
        principal * r / (1.0 - (1.0 + r).powf(-n))
    };

    require_finite("emi", raw)?;
    Ok(round_to_minor_unit(raw))
}

/// Lazy month-by-month repayment schedule
pub fn amortization_schedule(
    principal: f64,
    annual_rate_percent: f64,
    tenure_months: u32,
) -> Result<AmortizationSchedule> {
    AmortizationSchedule::new(principal, annual_rate_percent, tenure_months)
}

/// Fixed obligation to income ratio
pub fn foir(total_monthly_obligations: f64, monthly_income: f64) -> Result<f64> {
    require_positive("monthly_income", monthly_income)?;
    if !total_monthly_obligations.is_finite() || total_monthly_obligations < 0.0 {
        return Err(OrchestrationError::InvalidInput(format!(
            "monthly obligations must be non-negative, got {}",
            total_monthly_obligations
        )));
    }

    Ok(total_monthly_obligations / monthly_income)
}

/// Loan-to-value ratio
pub fn ltv(loan_amount: f64, market_value: f64) -> Result<f64> {
    require_positive("market_value", market_value)?;
    if !loan_amount.is_finite() || loan_amount < 0.0 {
        return Err(OrchestrationError::InvalidInput(format!(
            "loan amount must be non-negative, got {}",
            loan_amount
        )));
    }

    Ok(loan_amount / market_value)
}

/// Itemized upfront fees for a principal
pub fn fee_structure(principal: f64) -> Result<Vec<FeeItem>> {
    require_positive("principal", principal)?;

    Ok(FEE_SCHEDULE
        .iter()
        .map(|(category, rate)| FeeItem {
            category: *category,
            rate: *rate,
            amount: round_to_minor_unit(principal * rate),
        })
        .collect())
}

/// Breakdown of the full cost of borrowing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostSummary {
    pub emi: f64,
    pub total_interest: f64,
    pub total_fees: f64,
    /// Principal + interest + fees
    pub total_cost: f64,
}

pub fn total_cost(principal: f64, annual_rate_percent: f64, tenure_months: u32) -> Result<CostSummary> {
    let schedule = amortization_schedule(principal, annual_rate_percent, tenure_months)?;
    let total_interest = round_to_minor_unit(schedule.iter().map(|e| e.interest).sum());
    let total_fees = round_to_minor_unit(fee_structure(principal)?.iter().map(|f| f.amount).sum());

    Ok(CostSummary {
        emi: schedule.emi(),
        total_interest,
        total_fees,
        total_cost: round_to_minor_unit(principal + total_interest + total_fees),
    })
}

/// Effective annual rate in percent for monthly compounding
pub fn effective_annual_rate(annual_rate_percent: f64) -> Result<f64> {
    require_rate(annual_rate_percent)?;
    let r = monthly_rate(annual_rate_percent);
    Ok(((1.0 + r).powi(12) - 1.0) * 100.0)
}

/// Largest principal serviceable at `CAPACITY_FOIR` after existing EMIs.
///
/// Returns zero when existing obligations already consume the capacity.
pub fn borrowing_capacity(
    monthly_income: f64,
    existing_emis: f64,
    annual_rate_percent: f64,
    tenure_months: u32,
) -> Result<f64> {
    require_positive("monthly_income", monthly_income)?;
    require_rate(annual_rate_percent)?;
    if tenure_months == 0 {
        return Err(OrchestrationError::InvalidInput(
            "tenure_months must be positive".to_string(),
        ));
    }

    let available = monthly_income * CAPACITY_FOIR - existing_emis.max(0.0);
    if available <= 0.0 {
        return Ok(0.0);
    }

    let r = monthly_rate(annual_rate_percent);
    let n = tenure_months as f64;
    let capacity = if r == 0.0 {
        available * n
    } else {
        available * (1.0 - (1.0 + r).powf(-n)) / r
    };

    require_finite("borrowing capacity", capacity)?;
    Ok(capacity.floor())
}

/// Longest tenure such that the loan matures by `MAX_AGE_AT_MATURITY`
pub fn max_tenure_years(age: u32) -> u32 {
    MAX_TENURE_YEARS.min(MAX_AGE_AT_MATURITY.saturating_sub(age))
}
