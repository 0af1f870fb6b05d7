use axum::{
    Router,
    extract::{
        Json, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::NaiveDate;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    InputParameters, PeriodRecord, ProjectionError, SummaryTotals, YearSnapshot, run_projection,
    yearly_series,
};

/// Engine field name, CLI flag, API payload key.
const FIELD_NAMES: [(&str, &str, &str); 8] = [
    ("loan_amount", "--loan-amount", "loanAmount"),
    ("annual_interest_rate_pct", "--interest-rate", "interestRate"),
    ("loan_term_years", "--loan-term", "loanTerm"),
    ("monthly_rent", "--monthly-rent", "monthlyRent"),
    (
        "annual_investment_return_pct",
        "--investment-return",
        "investmentReturn",
    ),
    (
        "annual_property_appreciation_pct",
        "--appreciation-rate",
        "appreciationRate",
    ),
    (
        "annual_rent_escalation_pct",
        "--rent-escalation",
        "rentEscalation",
    ),
    ("start_date", "--start-date", "startDate"),
];

#[derive(Debug, Error)]
pub enum CliError {
    /// Flag parsing failed, or `--help`/`--version` was requested.
    #[error("{0}")]
    Args(#[from] clap::Error),
    #[error("{0}")]
    Input(String),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Surface {
    Cli,
    Http,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectPayload {
    loan_amount: Option<f64>,
    interest_rate: Option<f64>,
    loan_term: Option<u32>,
    monthly_rent: Option<f64>,
    investment_return: Option<f64>,
    appreciation_rate: Option<f64>,
    rent_escalation: Option<f64>,
    start_date: Option<NaiveDate>,
}

#[derive(Parser, Debug)]
#[command(
    name = "homefunds",
    about = "Rent vs buy projection: mortgage amortization against renting and investing the difference",
    after_help = "Run `homefunds serve [port]` to start the HTTP API instead."
)]
struct Cli {
    #[arg(long, default_value_t = 8_000_000.0, help = "Loan principal")]
    loan_amount: f64,
    #[arg(
        long,
        default_value_t = 8.55,
        help = "Annual mortgage interest rate in percent"
    )]
    interest_rate: f64,
    #[arg(long, default_value_t = 20, help = "Loan term in years")]
    loan_term: u32,
    #[arg(long, default_value_t = 25_000.0, help = "Starting monthly rent")]
    monthly_rent: f64,
    #[arg(
        long,
        default_value_t = 12.0,
        help = "Annual return on the invested difference in percent"
    )]
    investment_return: f64,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Annual property appreciation in percent, compounded monthly"
    )]
    appreciation_rate: f64,
    #[arg(
        long,
        default_value_t = 7.0,
        help = "Rent escalation in percent, applied every 13th month"
    )]
    rent_escalation: f64,
    #[arg(
        long,
        help = "Calendar anchor for year labels (YYYY-MM-DD); defaults to today"
    )]
    start_date: Option<NaiveDate>,
    #[arg(long, help = "Print one snapshot per calendar year instead of the monthly ledger")]
    yearly: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    totals: SummaryTotals,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    records: Vec<PeriodRecord>,
    yearly: Vec<YearSnapshot>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

fn build_params(cli: &Cli) -> InputParameters {
    InputParameters {
        loan_amount: cli.loan_amount,
        annual_interest_rate_pct: cli.interest_rate,
        loan_term_years: cli.loan_term,
        monthly_rent: cli.monthly_rent,
        annual_investment_return_pct: cli.investment_return,
        annual_property_appreciation_pct: cli.appreciation_rate,
        annual_rent_escalation_pct: cli.rent_escalation,
        start_date: cli.start_date,
    }
}

fn describe_error(err: &ProjectionError, surface: Surface) -> String {
    let ProjectionError::InvalidParameter { field, reason } = err;
    let name = FIELD_NAMES
        .iter()
        .find(|(engine_name, _, _)| *engine_name == *field)
        .map(|(_, flag, key)| match surface {
            Surface::Cli => *flag,
            Surface::Http => *key,
        })
        .unwrap_or(*field);
    format!("{name} {reason}")
}

fn build_response(
    params: &InputParameters,
    include_records: bool,
) -> Result<ProjectResponse, ProjectionError> {
    let projection = run_projection(params)?;
    let yearly = yearly_series(&projection.records);
    Ok(ProjectResponse {
        totals: projection.totals,
        records: if include_records {
            projection.records
        } else {
            Vec::new()
        },
        yearly,
    })
}

/// Parses CLI arguments, runs one projection and returns it as pretty JSON.
pub fn run_cli<I, T>(args: I) -> Result<String, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args)?;
    let params = build_params(&cli);
    let response = build_response(&params, !cli.yearly)
        .map_err(|e| CliError::Input(describe_error(&e, Surface::Cli)))?;
    serde_json::to_string_pretty(&response)
        .map_err(|e| CliError::Input(format!("failed to encode projection: {e}")))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router();

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "rent vs buy HTTP API listening");
    info!("local access: http://127.0.0.1:{port}/api/project");

    axum::serve(listener, app).await
}

fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/project",
            get(project_get_handler).post(project_post_handler),
        )
        .fallback(not_found_handler)
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_get_handler(
    payload: Result<Query<ProjectPayload>, QueryRejection>,
) -> Response {
    match payload {
        Ok(Query(payload)) => project_handler_impl(payload).await,
        Err(rejection) => rejected_payload(&rejection.body_text()),
    }
}

async fn project_post_handler(
    payload: Result<Json<ProjectPayload>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(payload)) => project_handler_impl(payload).await,
        Err(rejection) => rejected_payload(&rejection.body_text()),
    }
}

fn rejected_payload(detail: &str) -> Response {
    let msg = format!("Invalid API payload: {detail}");
    warn!(error = %msg, "rejected projection request");
    error_response(StatusCode::BAD_REQUEST, &msg)
}

async fn project_handler_impl(payload: ProjectPayload) -> Response {
    let params = params_from_payload(payload);
    match build_response(&params, true) {
        Ok(response) => {
            info!(
                loan_term_years = params.loan_term_years,
                months = response.records.len(),
                "projection served"
            );
            json_response(StatusCode::OK, response)
        }
        Err(err) => {
            let msg = describe_error(&err, Surface::Http);
            warn!(error = %msg, "rejected projection request");
            error_response(StatusCode::BAD_REQUEST, &msg)
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn params_from_json(json: &str) -> Result<InputParameters, String> {
    let payload = serde_json::from_str::<ProjectPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    Ok(params_from_payload(payload))
}

fn params_from_payload(payload: ProjectPayload) -> InputParameters {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.loan_amount {
        cli.loan_amount = v;
    }
    if let Some(v) = payload.interest_rate {
        cli.interest_rate = v;
    }
    if let Some(v) = payload.loan_term {
        cli.loan_term = v;
    }
    if let Some(v) = payload.monthly_rent {
        cli.monthly_rent = v;
    }
    if let Some(v) = payload.investment_return {
        cli.investment_return = v;
    }
    if let Some(v) = payload.appreciation_rate {
        cli.appreciation_rate = v;
    }
    if let Some(v) = payload.rent_escalation {
        cli.rent_escalation = v;
    }
    if let Some(v) = payload.start_date {
        cli.start_date = Some(v);
    }

    build_params(&cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        loan_amount: 8_000_000.0,
        interest_rate: 8.55,
        loan_term: 20,
        monthly_rent: 25_000.0,
        investment_return: 12.0,
        appreciation_rate: 3.0,
        rent_escalation: 7.0,
        start_date: None,
        yearly: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use clap::error::ErrorKind;
    use tower::ServiceExt;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn cli_defaults_match_api_defaults() {
        let parsed = Cli::parse_from(["homefunds"]);
        let from_cli = build_params(&parsed);
        let from_api = build_params(&default_cli_for_api());
        assert_eq!(from_cli, from_api);
        assert!(!parsed.yearly);
    }

    #[test]
    fn cli_flags_map_onto_input_parameters() {
        let cli = Cli::parse_from([
            "homefunds",
            "--loan-amount",
            "500000",
            "--interest-rate",
            "6.5",
            "--loan-term",
            "15",
            "--monthly-rent",
            "1800",
            "--investment-return",
            "9",
            "--appreciation-rate",
            "2.5",
            "--rent-escalation",
            "4",
            "--start-date",
            "2025-03-01",
            "--yearly",
        ]);
        let params = build_params(&cli);

        assert_approx(params.loan_amount, 500_000.0);
        assert_approx(params.annual_interest_rate_pct, 6.5);
        assert_eq!(params.loan_term_years, 15);
        assert_approx(params.monthly_rent, 1_800.0);
        assert_approx(params.annual_investment_return_pct, 9.0);
        assert_approx(params.annual_property_appreciation_pct, 2.5);
        assert_approx(params.annual_rent_escalation_pct, 4.0);
        assert_eq!(params.start_date, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert!(cli.yearly);
    }

    #[test]
    fn params_from_json_parses_web_keys() {
        let json = r#"{
          "loanAmount": 3000000,
          "interestRate": 7.25,
          "loanTerm": 25,
          "monthlyRent": 18000,
          "investmentReturn": 10,
          "appreciationRate": 4,
          "rentEscalation": 5,
          "startDate": "2024-07-01"
        }"#;
        let params = params_from_json(json).expect("json should parse");

        assert_approx(params.loan_amount, 3_000_000.0);
        assert_approx(params.annual_interest_rate_pct, 7.25);
        assert_eq!(params.loan_term_years, 25);
        assert_approx(params.monthly_rent, 18_000.0);
        assert_approx(params.annual_investment_return_pct, 10.0);
        assert_approx(params.annual_property_appreciation_pct, 4.0);
        assert_approx(params.annual_rent_escalation_pct, 5.0);
        assert_eq!(params.start_date, NaiveDate::from_ymd_opt(2024, 7, 1));
    }

    #[test]
    fn params_from_json_keeps_defaults_for_missing_keys() {
        let params = params_from_json(r#"{ "loanTerm": 10 }"#).expect("json should parse");
        assert_eq!(params.loan_term_years, 10);
        assert_approx(params.loan_amount, 8_000_000.0);
        assert_approx(params.annual_interest_rate_pct, 8.55);
        assert_approx(params.monthly_rent, 25_000.0);
        assert_eq!(params.start_date, None);
    }

    #[test]
    fn params_from_json_rejects_malformed_date() {
        let err = params_from_json(r#"{ "startDate": "07/01/2024" }"#)
            .expect_err("must reject non ISO date");
        assert!(err.contains("Invalid API JSON payload"));
    }

    #[test]
    fn invalid_params_are_described_with_surface_names() {
        let mut cli = default_cli_for_api();
        cli.loan_term = 0;
        let err = build_response(&build_params(&cli), true).expect_err("must reject zero term");

        let cli_msg = describe_error(&err, Surface::Cli);
        assert!(cli_msg.starts_with("--loan-term "), "{cli_msg}");
        let http_msg = describe_error(&err, Surface::Http);
        assert!(http_msg.starts_with("loanTerm "), "{http_msg}");
    }

    #[test]
    fn project_response_serialization_contains_expected_fields() {
        let mut cli = default_cli_for_api();
        cli.loan_term = 2;
        cli.start_date = NaiveDate::from_ymd_opt(2024, 1, 15);

        let response = build_response(&build_params(&cli), true).expect("valid params");
        assert_eq!(response.records.len(), 24);
        assert_eq!(response.yearly.len(), 3);

        let json = serde_json::to_string(&response).expect("response should serialize");
        assert!(json.contains("\"fixedMonthlyPayment\""));
        assert!(json.contains("\"totals\""));
        assert!(json.contains("\"records\""));
        assert!(json.contains("\"yearly\""));
        assert!(json.contains("\"remainingPrincipal\""));
        assert!(json.contains("\"cumulativeMortgagePaid\""));
        assert!(json.contains("\"leadingStrategy\""));
        assert!(json.contains("\"lastMonth\""));
    }

    #[test]
    fn run_cli_yearly_omits_monthly_records() {
        let json = run_cli([
            "homefunds",
            "--loan-term",
            "3",
            "--start-date",
            "2024-01-15",
            "--yearly",
        ])
        .expect("valid cli");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert!(value.get("records").is_none());
        assert_eq!(value["yearly"].as_array().map(Vec::len), Some(4));
        assert_eq!(value["yearly"][0]["year"], 2024);
    }

    #[test]
    fn run_cli_reports_invalid_flag_values() {
        let err = run_cli(["homefunds", "--monthly-rent", "0"]).expect_err("must reject zero rent");
        let CliError::Input(msg) = &err else {
            panic!("expected an input error, got {err:?}");
        };
        assert!(msg.starts_with("--monthly-rent "), "{msg}");
    }

    #[test]
    fn run_cli_returns_malformed_flags_as_errors() {
        let err = run_cli(["homefunds", "--loan-amount", "abc"]).expect_err("must reject abc");
        let CliError::Args(clap_err) = &err else {
            panic!("expected an argument error, got {err:?}");
        };
        assert_eq!(clap_err.kind(), ErrorKind::ValueValidation);
        assert!(clap_err.use_stderr());
        assert!(err.to_string().contains("--loan-amount"), "{err}");

        let err = run_cli(["homefunds", "--no-such-flag"]).expect_err("must reject unknown flag");
        assert!(matches!(err, CliError::Args(ref e) if e.kind() == ErrorKind::UnknownArgument));
    }

    #[test]
    fn run_cli_surfaces_help_without_exiting() {
        let err = run_cli(["homefunds", "--help"]).expect_err("help is not a projection");
        let CliError::Args(clap_err) = err else {
            panic!("expected an argument error");
        };
        assert_eq!(clap_err.kind(), ErrorKind::DisplayHelp);
        assert!(!clap_err.use_stderr());
    }

    async fn send(request: Request<Body>) -> (StatusCode, Option<HeaderValue>, serde_json::Value) {
        let response = router().oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let cache_control = response.headers().get(header::CACHE_CONTROL).cloned();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        let body = serde_json::from_slice(&bytes).expect("json body");
        (status, cache_control, body)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("valid request")
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/project")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("valid request")
    }

    fn assert_json_bad_request(
        (status, cache_control, body): (StatusCode, Option<HeaderValue>, serde_json::Value),
    ) -> String {
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(cache_control, Some(HeaderValue::from_static("no-store")));
        body["error"]
            .as_str()
            .expect("error message")
            .to_string()
    }

    #[tokio::test]
    async fn get_project_serves_ledger_as_json() {
        let (status, cache_control, body) =
            send(get_request("/api/project?loanTerm=1&startDate=2024-01-15")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache_control, Some(HeaderValue::from_static("no-store")));
        assert_eq!(body["records"].as_array().map(Vec::len), Some(12));
        assert_eq!(body["records"][0]["year"], 2024);
        assert!(body["totals"]["fixedMonthlyPayment"].is_number());
        assert!(body.get("fixedMonthlyPayment").is_none());
    }

    #[tokio::test]
    async fn post_project_accepts_json_body() {
        let (status, _, body) =
            send(post_json(r#"{ "loanTerm": 2, "startDate": "2024-01-15" }"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["records"].as_array().map(Vec::len), Some(24));
        assert_eq!(body["yearly"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn malformed_json_body_is_rejected_as_json_error() {
        let msg = assert_json_bad_request(send(post_json("{ not json")).await);
        assert!(msg.starts_with("Invalid API payload"), "{msg}");
    }

    #[tokio::test]
    async fn bad_start_date_in_body_is_rejected_as_json_error() {
        let msg =
            assert_json_bad_request(send(post_json(r#"{ "startDate": "07/01/2024" }"#)).await);
        assert!(msg.starts_with("Invalid API payload"), "{msg}");
    }

    #[tokio::test]
    async fn negative_loan_term_in_query_is_rejected_as_json_error() {
        let msg = assert_json_bad_request(send(get_request("/api/project?loanTerm=-3")).await);
        assert!(msg.starts_with("Invalid API payload"), "{msg}");
    }

    #[tokio::test]
    async fn engine_validation_errors_name_payload_keys() {
        let msg = assert_json_bad_request(send(get_request("/api/project?monthlyRent=0")).await);
        assert!(msg.starts_with("monthlyRent "), "{msg}");
    }

    #[tokio::test]
    async fn unknown_route_returns_json_not_found() {
        let (status, cache_control, body) = send(get_request("/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(cache_control, Some(HeaderValue::from_static("no-store")));
        assert_eq!(body["error"], "Not found");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, _, body) = send(get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[test]
    fn error_response_is_json_with_no_store() {
        let response = error_response(StatusCode::BAD_REQUEST, "loanTerm must be positive");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
    }
}
