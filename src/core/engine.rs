use chrono::{Datelike, Local, Months, NaiveDate};
use tracing::{debug, warn};

use super::error::ProjectionError;
use super::types::{
    InputParameters, PeriodRecord, Projection, Strategy, SummaryTotals, YearSnapshot,
};

pub const MAX_LOAN_TERM_YEARS: u32 = 100;
const MONTHS_PER_YEAR: u32 = 12;
/// Rent steps up on months divisible by this, not on every twelfth month.
const RENT_ESCALATION_INTERVAL_MONTHS: u32 = 13;

#[derive(Debug, Clone, Copy)]
struct MonthlyRates {
    interest: f64,
    fixed_payment: f64,
    investment: f64,
    appreciation: f64,
    rent_escalation: f64,
}

impl MonthlyRates {
    fn from_params(params: &InputParameters, total_months: u32) -> Self {
        Self {
            interest: params.annual_interest_rate_pct / 100.0 / 12.0,
            fixed_payment: fixed_monthly_payment(
                params.loan_amount,
                params.annual_interest_rate_pct,
                total_months,
            ),
            investment: params.annual_investment_return_pct / 12.0 / 100.0,
            appreciation: params.annual_property_appreciation_pct / 12.0 / 100.0,
            rent_escalation: params.annual_rent_escalation_pct / 100.0,
        }
    }
}

/// Unrounded balances carried from one month into the next.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LedgerState {
    remaining_principal: f64,
    rent: f64,
    invested_balance: f64,
    property_value: f64,
    mortgage_paid: f64,
    rent_paid: f64,
}

impl LedgerState {
    fn opening(params: &InputParameters) -> Self {
        Self {
            remaining_principal: params.loan_amount,
            rent: params.monthly_rent,
            invested_balance: 0.0,
            property_value: params.loan_amount,
            mortgage_paid: 0.0,
            rent_paid: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MonthFlows {
    principal_payment: f64,
    interest_payment: f64,
    difference: f64,
}

/// Level annuity payment for a loan, or straight-line principal when the
/// rate is zero.
pub fn fixed_monthly_payment(
    loan_amount: f64,
    annual_interest_rate_pct: f64,
    total_months: u32,
) -> f64 {
    let months = total_months as f64;
    let rate = annual_interest_rate_pct / 100.0 / 12.0;
    if rate == 0.0 {
        return loan_amount / months;
    }
    // 1 - (1+r)^-n without cancellation; `1.0 + rate` rounds to 1.0 for tiny rates.
    let discount = -(-months * rate.ln_1p()).exp_m1();
    loan_amount * rate / discount
}

pub fn run_projection(params: &InputParameters) -> Result<Projection, ProjectionError> {
    let start_date = params
        .start_date
        .unwrap_or_else(|| Local::now().date_naive());
    validate_params(params, start_date)?;

    let total_months = params.loan_term_years * MONTHS_PER_YEAR;
    let rates = MonthlyRates::from_params(params, total_months);
    if params.annual_interest_rate_pct == 0.0 {
        warn!(
            loan_amount = params.loan_amount,
            total_months, "zero interest rate, amortizing principal straight-line"
        );
    }
    debug!(
        total_months,
        fixed_payment = rates.fixed_payment,
        monthly_interest = rates.interest,
        monthly_investment = rates.investment,
        monthly_appreciation = rates.appreciation,
        %start_date,
        "running rent vs buy projection"
    );

    let mut records = Vec::with_capacity(total_months as usize);
    let closing = (1..=total_months).fold(LedgerState::opening(params), |state, month| {
        let (next, flows) = advance_month(state, month, &rates);
        records.push(emit_record(
            month,
            calendar_year(start_date, month),
            &next,
            &flows,
            &rates,
        ));
        next
    });

    Ok(Projection {
        records,
        totals: summarize(&closing, &rates),
    })
}

/// Collapses the monthly ledger to the last record of each calendar year.
pub fn yearly_series(records: &[PeriodRecord]) -> Vec<YearSnapshot> {
    let mut series: Vec<YearSnapshot> = Vec::new();
    for record in records {
        let snapshot = YearSnapshot {
            year: record.year,
            last_month: record.month,
            property_value: record.property_value,
            invested_balance: record.invested_balance,
            cumulative_mortgage_paid: record.cumulative_mortgage_paid,
            remaining_principal: record.remaining_principal,
        };
        match series.last_mut() {
            Some(last) if last.year == record.year => *last = snapshot,
            _ => series.push(snapshot),
        }
    }
    series
}

fn validate_params(
    params: &InputParameters,
    start_date: NaiveDate,
) -> Result<(), ProjectionError> {
    for (field, amount) in [
        ("loan_amount", params.loan_amount),
        ("monthly_rent", params.monthly_rent),
    ] {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ProjectionError::invalid(
                field,
                format!("must be a finite amount > 0, got {amount}"),
            ));
        }
    }

    if params.loan_term_years == 0 || params.loan_term_years > MAX_LOAN_TERM_YEARS {
        return Err(ProjectionError::invalid(
            "loan_term_years",
            format!(
                "must be between 1 and {MAX_LOAN_TERM_YEARS}, got {}",
                params.loan_term_years
            ),
        ));
    }

    for (field, rate) in [
        ("annual_interest_rate_pct", params.annual_interest_rate_pct),
        (
            "annual_investment_return_pct",
            params.annual_investment_return_pct,
        ),
        (
            "annual_property_appreciation_pct",
            params.annual_property_appreciation_pct,
        ),
        (
            "annual_rent_escalation_pct",
            params.annual_rent_escalation_pct,
        ),
    ] {
        if !rate.is_finite() || rate < 0.0 {
            return Err(ProjectionError::invalid(
                field,
                format!("must be a finite percentage >= 0, got {rate}"),
            ));
        }
    }

    let total_months = params.loan_term_years * MONTHS_PER_YEAR;
    if start_date
        .checked_add_months(Months::new(total_months))
        .is_none()
    {
        return Err(ProjectionError::invalid(
            "start_date",
            format!("{start_date} plus {total_months} months is outside the calendar range"),
        ));
    }

    Ok(())
}

fn advance_month(
    state: LedgerState,
    month: u32,
    rates: &MonthlyRates,
) -> (LedgerState, MonthFlows) {
    let interest_payment = state.remaining_principal * rates.interest;
    let principal_payment = rates.fixed_payment - interest_payment;

    let rent = if month % RENT_ESCALATION_INTERVAL_MONTHS == 0 {
        state.rent * (1.0 + rates.rent_escalation)
    } else {
        state.rent
    };
    let difference = rates.fixed_payment - rent;

    let next = LedgerState {
        remaining_principal: state.remaining_principal - principal_payment,
        rent,
        // Contribution lands before the month's growth.
        invested_balance: (state.invested_balance + difference) * (1.0 + rates.investment),
        property_value: state.property_value * (1.0 + rates.appreciation),
        mortgage_paid: state.mortgage_paid + rates.fixed_payment,
        rent_paid: state.rent_paid + rent,
    };
    let flows = MonthFlows {
        principal_payment,
        interest_payment,
        difference,
    };
    (next, flows)
}

fn calendar_year(start_date: NaiveDate, month: u32) -> i32 {
    // Range checked in validate_params.
    (start_date + Months::new(month)).year()
}

fn emit_record(
    month: u32,
    year: i32,
    state: &LedgerState,
    flows: &MonthFlows,
    rates: &MonthlyRates,
) -> PeriodRecord {
    PeriodRecord {
        month,
        year,
        principal_payment: whole_units(flows.principal_payment),
        interest_payment: whole_units(flows.interest_payment),
        remaining_principal: whole_units(state.remaining_principal),
        total_payment: whole_units(rates.fixed_payment),
        rent_payment: whole_units(state.rent),
        difference: whole_units(flows.difference),
        invested_balance: whole_units(state.invested_balance),
        property_value: whole_units(state.property_value),
        cumulative_mortgage_paid: whole_units(state.mortgage_paid),
    }
}

fn summarize(closing: &LedgerState, rates: &MonthlyRates) -> SummaryTotals {
    let leading_strategy = if closing.property_value >= closing.invested_balance {
        Strategy::Buy
    } else {
        Strategy::Rent
    };
    SummaryTotals {
        fixed_monthly_payment: whole_units(rates.fixed_payment),
        total_mortgage_paid: whole_units(closing.mortgage_paid),
        total_rent_paid: whole_units(closing.rent_paid),
        final_invested_balance: whole_units(closing.invested_balance),
        final_property_value: whole_units(closing.property_value),
        wealth_gap: whole_units(closing.property_value - closing.invested_balance),
        leading_strategy,
    }
}

fn whole_units(value: f64) -> f64 {
    let rounded = value.round();
    // Drop the sign from -0.0 so emitted ledgers never show "-0".
    if rounded == 0.0 { 0.0 } else { rounded }
}
