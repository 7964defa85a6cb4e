//! Amortization schedule
//!
//! The schedule is a restartable lazy sequence: iterating twice yields the
//! same entries. Balances are carried in minor units so the principal
//! components sum to the original principal exactly.

use super::{emi, monthly_rate, round_to_minor_unit};
use crate::models::AmortizationEntry;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmortizationSchedule {
    principal: f64,
    monthly_rate: f64,
    emi: f64,
    tenure_months: u32,
}

impl AmortizationSchedule {
    pub fn new(principal: f64, annual_rate_percent: f64, tenure_months: u32) -> Result<Self> {
        let emi = emi(principal, annual_rate_percent, tenure_months)?;

        Ok(Self {
            principal: round_to_minor_unit(principal),
            monthly_rate: monthly_rate(annual_rate_percent),
            emi,
            tenure_months,
        })
    }

    pub fn emi(&self) -> f64 {
        self.emi
    }

    pub fn principal(&self) -> f64 {
        self.principal
    }

    pub fn len(&self) -> usize {
        self.tenure_months as usize
    }

    pub fn is_empty(&self) -> bool {
        self.tenure_months == 0
    }

    pub fn iter(&self) -> AmortizationIter {
        AmortizationIter {
            schedule: *self,
            period: 0,
            balance: self.principal,
        }
    }
}

impl IntoIterator for &AmortizationSchedule {
    type Item = AmortizationEntry;
    type IntoIter = AmortizationIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct AmortizationIter {
    schedule: AmortizationSchedule,
    period: u32,
    balance: f64,
}

impl Iterator for AmortizationIter {
    type Item = AmortizationEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.period >= self.schedule.tenure_months {
            return None;
        }
        self.period += 1;

        let interest = round_to_minor_unit(self.balance * self.schedule.monthly_rate);
        let last = self.period == self.schedule.tenure_months;

        // The final period retires whatever balance remains.
        let principal = if last {
            self.balance
        } else {
            round_to_minor_unit(self.schedule.emi - interest).min(self.balance)
        };

        self.balance = if last {
            0.0
        } else {
            round_to_minor_unit(self.balance - principal).max(0.0)
        };

        Some(AmortizationEntry {
            period: self.period,
            payment: round_to_minor_unit(principal + interest),
            principal,
            interest,
            balance: self.balance,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.schedule.tenure_months - self.period) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for AmortizationIter {}
