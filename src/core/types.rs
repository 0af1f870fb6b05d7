use chrono::NaiveDate;
use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Buy,
    Rent,
}

/// Loan, rent and growth assumptions for one projection run.
///
/// Rates are whole-or-fractional percentages, so `8.55` means 8.55% per year.
#[derive(Debug, Clone, PartialEq)]
pub struct InputParameters {
    pub loan_amount: f64,
    pub annual_interest_rate_pct: f64,
    pub loan_term_years: u32,
    pub monthly_rent: f64,
    pub annual_investment_return_pct: f64,
    pub annual_property_appreciation_pct: f64,
    pub annual_rent_escalation_pct: f64,
    /// Anchor for the calendar year labels. `None` reads today's local date.
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRecord {
    pub month: u32,
    pub year: i32,
    pub principal_payment: f64,
    pub interest_payment: f64,
    pub remaining_principal: f64,
    pub total_payment: f64,
    pub rent_payment: f64,
    pub difference: f64,
    pub invested_balance: f64,
    pub property_value: f64,
    pub cumulative_mortgage_paid: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryTotals {
    pub fixed_monthly_payment: f64,
    pub total_mortgage_paid: f64,
    pub total_rent_paid: f64,
    pub final_invested_balance: f64,
    pub final_property_value: f64,
    pub wealth_gap: f64,
    pub leading_strategy: Strategy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub records: Vec<PeriodRecord>,
    pub totals: SummaryTotals,
}

/// End-of-year values for the buy and rent paths, one per calendar year.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSnapshot {
    pub year: i32,
    pub last_month: u32,
    pub property_value: f64,
    pub invested_balance: f64,
    pub cumulative_mortgage_paid: f64,
    pub remaining_principal: f64,
}
