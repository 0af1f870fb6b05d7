mod engine;
mod error;
mod types;

pub use engine::{MAX_LOAN_TERM_YEARS, fixed_monthly_payment, run_projection, yearly_series};
pub use error::ProjectionError;
pub use types::{
    InputParameters, PeriodRecord, Projection, Strategy, SummaryTotals, YearSnapshot,
};
