//! Control surface: dataset browsing, CSV export and scraper start/stop.
//!
//! Every route except `/health` requires HTTP Basic auth.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::runtime::Handle;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth::AuthUser;
use crate::config::Config;
use crate::control::{RunController, StatusReport};
use crate::db::{self, CompanyFilter, CompanyRecord, LeadSink, SqliteSink};
use crate::logging::LogTail;
use crate::orchestrator;

pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub controller: RunController,
    pub logs: LogTail,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/companies", get(list_companies))
        .route("/api/stats", get(get_stats))
        .route("/api/cities", get(list_cities))
        .route("/api/export/csv", get(export_csv))
        .route("/api/scraper/status", get(scraper_status))
        .route("/api/scraper/start", post(start_scraper))
        .route("/api/scraper/stop", post(stop_scraper))
        .route("/api/scraper/logs", get(scraper_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn internal(e: anyhow::Error) -> StatusCode {
    error!("❌ request failed: {:#}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct CompaniesResponse {
    pub count: usize,
    pub companies: Vec<CompanyRecord>,
}

pub async fn list_companies(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(filter): Query<CompanyFilter>,
) -> Result<Json<CompaniesResponse>, StatusCode> {
    let companies = db::list_companies(&state.pool, &filter)
        .await
        .map_err(internal)?;
    Ok(Json(CompaniesResponse {
        count: companies.len(),
        companies,
    }))
}

pub async fn get_stats(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<Json<db::Stats>, StatusCode> {
    Ok(Json(db::stats(&state.pool).await.map_err(internal)?))
}

#[derive(Debug, Serialize)]
pub struct CitiesResponse {
    pub cities: Vec<String>,
}

pub async fn list_cities(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CitiesResponse>, StatusCode> {
    let cities = db::cities(&state.pool).await.map_err(internal)?;
    Ok(Json(CitiesResponse { cities }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub city: Option<String>,
}

pub async fn export_csv(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, StatusCode> {
    let city = query.city.filter(|c| !c.is_empty());
    let filter = CompanyFilter {
        city: city.clone(),
        ..Default::default()
    };
    let companies = db::list_companies(&state.pool, &filter)
        .await
        .map_err(internal)?;
    let body = companies_csv(&companies).map_err(internal)?;

    let filename = export_filename(city.as_deref(), chrono::Local::now().date_naive());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}

pub fn companies_csv(companies: &[CompanyRecord]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for company in companies {
        writer.serialize(company)?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing csv buffer: {}", e))
}

/// `companies_{city|all}_{YYYYMMDD}.csv`, ASCII only so it fits a header.
pub fn export_filename(city: Option<&str>, date: chrono::NaiveDate) -> String {
    let scope = match city {
        Some(city) => city
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect(),
        None => "all".to_string(),
    };
    format!("companies_{}_{}.csv", scope, date.format("%Y%m%d"))
}

pub async fn scraper_status(_user: AuthUser, State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.controller.status())
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    pub run_id: Option<String>,
}

type ControlResult = Result<Json<ControlResponse>, (StatusCode, Json<ControlResponse>)>;

fn rejected(message: String) -> (StatusCode, Json<ControlResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ControlResponse {
            success: false,
            message,
            run_id: None,
        }),
    )
}

pub async fn start_scraper(_user: AuthUser, State(state): State<Arc<AppState>>) -> ControlResult {
    let config = state.config.clone();
    let sink: Arc<dyn LeadSink> = Arc::new(SqliteSink::new(state.pool.clone(), Handle::current()));

    let started = state
        .controller
        .start(move |run| orchestrator::chrome_run(&config, sink, run))
        .map_err(|e| rejected(e.to_string()))?;

    Ok(Json(ControlResponse {
        success: true,
        message: "Scraper started".to_string(),
        run_id: Some(started.run_id),
    }))
}

pub async fn stop_scraper(_user: AuthUser, State(state): State<Arc<AppState>>) -> ControlResult {
    state.controller.stop().map_err(|e| rejected(e.to_string()))?;
    Ok(Json(ControlResponse {
        success: true,
        message: "Stop requested, the current work unit will finish first".to_string(),
        run_id: state.controller.status().run.run_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<String>,
}

pub async fn scraper_logs(_user: AuthUser, State(state): State<Arc<AppState>>) -> Json<LogsResponse> {
    Json(LogsResponse {
        logs: state.logs.snapshot(),
    })
}
