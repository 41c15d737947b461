//! JSON API over the persisted emissions dataset.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use ghg_core::{Continent, EmissionRecord, Sector};
use ghg_pipeline::{artifacts, report};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub mod assistant;
pub mod query;
pub mod service;

use assistant::{DataContext, QueryAssistant, QueryResponse};
use query::{DataQuery, QueryError, View};
use service::{ArtifactPaths, DataService, ServiceError, DEFAULT_CACHE_TTL};

pub const CRATE_NAME: &str = "ghg-web";
pub const API_TITLE: &str = "Global Emissions Data API";
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MAX_QUESTION_CHARS: usize = 1000;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub output_dir: PathBuf,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
    pub cache_ttl: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            output_dir: PathBuf::from("./data"),
            cors_origins: Vec::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl WebConfig {
    /// `HOST`, `PORT`, `GHG_OUTPUT_DIR`, `CORS_ORIGINS`, `GHG_CACHE_TTL_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            output_dir: std::env::var("GHG_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
            cache_ttl: std::env::var("GHG_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty() && *o != "*")
        .map(str::to_string)
        .collect()
}

pub struct AppState {
    pub data: DataService,
    pub assistant: QueryAssistant,
}

impl AppState {
    pub fn new(data: DataService, assistant: QueryAssistant) -> Self {
        Self { data, assistant }
    }

    pub fn from_config(config: &WebConfig) -> Self {
        Self::new(
            DataService::new(ArtifactPaths::in_dir(&config.output_dir), config.cache_ttl),
            QueryAssistant::from_env(),
        )
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Service(ServiceError::DataUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Service(ServiceError::Load(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Query(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/data", get(data_handler))
        .route("/countries", get(countries_handler))
        .route("/years", get(years_handler))
        .route("/sectors", get(sectors_handler))
        .route("/insights", get(insights_handler))
        .route("/download", get(download_handler))
        .route("/query", post(query_handler))
        .route("/cache/invalidate", post(invalidate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

pub async fn serve(config: WebConfig) -> anyhow::Result<()> {
    let router = app(AppState::from_config(&config)).layer(cors_layer(&config.cors_origins));
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        output_dir = %config.output_dir.display(),
        "serving emissions API"
    );
    axum::serve(listener, router).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(WebConfig::from_env()).await
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "name": API_TITLE,
        "version": API_VERSION,
        "endpoints": {
            "GET /data": "Retrieve emissions data with filters",
            "POST /query": "Natural language query",
            "GET /insights": "Generated insights for a year",
            "GET /countries": "List all countries",
            "GET /years": "List available years",
            "GET /sectors": "List emission sectors",
            "GET /health": "Health check",
            "GET /download": "Download data as CSV or JSON",
            "POST /cache/invalidate": "Reload data on the next request",
        }
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    data_loaded: bool,
    records_count: usize,
    ai_enabled: bool,
    web_search_enabled: bool,
    last_data_update: Option<String>,
    latest_year: Option<i32>,
    insights_generated_at: Option<String>,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = match state.data.snapshot().await {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!(error = %err, "health check without data");
            None
        }
    };
    let records_count = snapshot.as_ref().map(|s| s.emissions.len());
    let insights = snapshot.as_ref().and_then(|s| s.insights.as_ref());
    Json(HealthResponse {
        status: if records_count.is_some() { "healthy" } else { "degraded" },
        version: API_VERSION,
        data_loaded: records_count.is_some(),
        records_count: records_count.unwrap_or(0),
        ai_enabled: state.assistant.ai_enabled(),
        web_search_enabled: state.assistant.web_search_enabled(),
        last_data_update: state.data.last_loaded().map(|t| t.to_rfc3339()),
        latest_year: insights.map(|i| i.latest_year),
        insights_generated_at: insights.map(|i| i.generated_at.to_rfc3339()),
    })
}

async fn data_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DataQuery>,
) -> Result<Response, ApiError> {
    let parsed = query.parse()?;
    let snapshot = state.data.snapshot().await?;
    Ok(match parsed.view {
        View::Emissions => Json(parsed.run(&snapshot.emissions)).into_response(),
        View::Sectors => Json(parsed.run(&snapshot.sectors)).into_response(),
        View::Gases => Json(parsed.run(&snapshot.gases)).into_response(),
    })
}

#[derive(Debug, Deserialize, Default)]
struct CountriesQuery {
    continent: Option<String>,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
struct CountryEntry {
    country: String,
    iso: Option<String>,
    continent: Continent,
}

async fn countries_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CountriesQuery>,
) -> Result<Json<Value>, ApiError> {
    let continent = match query.continent.as_deref().map(str::trim) {
        Some(label) if !label.is_empty() && !label.eq_ignore_ascii_case("all") => {
            Some(label.parse::<Continent>().map_err(|e| ApiError::BadRequest(e.to_string()))?)
        }
        _ => None,
    };
    let snapshot = state.data.snapshot().await?;
    let countries: BTreeSet<CountryEntry> = snapshot
        .emissions
        .iter()
        .filter(|r| continent.map_or(true, |c| r.continent == c))
        .map(|r| CountryEntry {
            country: r.country.clone(),
            iso: r.iso.clone(),
            continent: r.continent,
        })
        .collect();
    Ok(Json(json!({
        "total": countries.len(),
        "countries": countries,
    })))
}

async fn years_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let snapshot = state.data.snapshot().await?;
    let years: BTreeSet<i32> = snapshot.emissions.iter().map(|r| r.year).collect();
    Ok(Json(json!({
        "min": years.first(),
        "max": years.last(),
        "count": years.len(),
        "years": years,
    })))
}

async fn sectors_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let snapshot = state.data.snapshot().await?;
    if snapshot.sectors.is_empty() {
        let canonical: Vec<&str> = Sector::ALL.iter().map(|s| s.label()).collect();
        return Ok(Json(json!({
            "sectors": canonical,
            "note": "Standard sectors (detailed sector data may not be available)",
        })));
    }
    let sectors: BTreeSet<&str> = snapshot.sectors.iter().map(|s| s.sector.label()).collect();
    Ok(Json(json!({ "sectors": sectors })))
}

#[derive(Debug, Deserialize, Default)]
struct InsightsQuery {
    year: Option<i32>,
}

async fn insights_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InsightsQuery>,
) -> Result<Response, ApiError> {
    let snapshot = state.data.snapshot().await?;
    let persisted = snapshot.insights.as_ref();
    let year = query
        .year
        .or(persisted.map(|i| i.latest_year))
        .or_else(|| snapshot.emissions.iter().map(|r| r.year).max())
        .ok_or_else(|| ApiError::NotFound("No data available".to_string()))?;
    // the pipeline's snapshot covers the latest year; keep its timestamp
    let generated_at = persisted
        .filter(|i| i.latest_year == year)
        .map_or_else(Utc::now, |i| i.generated_at);
    let insights = report::year_insights(&snapshot.emissions, &snapshot.sectors, year, generated_at)
        .ok_or_else(|| ApiError::NotFound(format!("No data available for year {year}")))?;
    Ok(Json(insights).into_response())
}

#[derive(Debug, Deserialize, Default)]
struct DownloadQuery {
    format: Option<String>,
    country: Option<String>,
    year: Option<i32>,
}

async fn download_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let format = query.format.as_deref().unwrap_or("csv").to_ascii_lowercase();
    if format != "csv" && format != "json" {
        return Err(ApiError::BadRequest(format!(
            "unsupported format `{format}`; expected csv or json"
        )));
    }
    let snapshot = state.data.snapshot().await?;
    let country = query.country.as_deref().map(str::to_lowercase);
    let rows: Vec<EmissionRecord> = snapshot
        .emissions
        .iter()
        .filter(|r| country.as_ref().map_or(true, |c| r.country.to_lowercase() == *c))
        .filter(|r| query.year.map_or(true, |y| r.year == y))
        .cloned()
        .collect();

    if format == "json" {
        return Ok(Json(rows).into_response());
    }
    let body = artifacts::csv_bytes(&rows).map_err(ApiError::Internal)?;
    let filename = format!("emissions_data_{}.csv", Utc::now().format("%Y%m%d"));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    include_web_search: bool,
    #[serde(default)]
    conversation_id: Option<String>,
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let chars = request.query.chars().count();
    if chars == 0 || chars > MAX_QUESTION_CHARS {
        return Err(ApiError::BadRequest(format!(
            "query must be between 1 and {MAX_QUESTION_CHARS} characters"
        )));
    }
    let snapshot = state.data.snapshot().await?;
    let context = DataContext::from_snapshot(&snapshot);
    let response = state
        .assistant
        .answer(
            &request.query,
            context,
            request.include_web_search,
            request.conversation_id.as_deref(),
        )
        .await;
    Ok(Json(response))
}

async fn invalidate_handler(State(state): State<Arc<AppState>>) -> Json<BTreeMap<&'static str, &'static str>> {
    state.data.invalidate();
    Json(BTreeMap::from([
        ("message", "Cache invalidated"),
        ("status", "success"),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use ghg_core::Source;
    use ghg_pipeline::derive::sector_view;
    use http_body_util::BodyExt;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    fn write_fixture(dir: &Path) {
        let mut rows = Vec::new();
        for year in 2000..=2024 {
            let mut fr = EmissionRecord::new("France", Some("FRA".into()), year, Source::Owid);
            fr.ghg_total_mt = Some(400.0);
            rows.push(fr);
        }
        for (country, iso, total) in [("China", "CHN", 14000.0), ("Brazil", "BRA", 1300.0)] {
            let mut r = EmissionRecord::new(country, Some(iso.into()), 2024, Source::ClimateWatch);
            r.ghg_total_mt = Some(total);
            rows.push(r);
        }
        std::fs::write(
            dir.join(artifacts::EMISSIONS_CSV),
            artifacts::csv_bytes(&rows).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.join(artifacts::SECTORS_CSV),
            artifacts::csv_bytes(&sector_view(&rows)).unwrap(),
        )
        .unwrap();
    }

    fn state_for(dir: &Path) -> AppState {
        AppState::new(
            DataService::new(ArtifactPaths::in_dir(dir), DEFAULT_CACHE_TTL),
            QueryAssistant::new(None, None),
        )
    }

    fn loaded_app() -> (TempDir, Router) {
        let dir = tempdir().unwrap();
        write_fixture(dir.path());
        let router = app(state_for(dir.path()));
        (dir, router)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn missing_artifacts_answer_503_and_degraded_health() {
        let dir = tempdir().unwrap();
        let app = app(state_for(dir.path()));

        let (status, body) = get_json(app.clone(), "/data").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"].as_str().unwrap().contains("run the pipeline"));

        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["data_loaded"], false);
        assert_eq!(body["last_data_update"], Value::Null);
    }

    #[tokio::test]
    async fn data_filters_and_paginates() {
        let (_dir, app) = loaded_app();
        let (status, body) = get_json(
            app.clone(),
            "/data?country=France&year_start=2010&year_end=2015&limit=4",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_records"], 6);
        assert_eq!(body["data"].as_array().unwrap().len(), 4);
        assert_eq!(body["data"][0]["year"], 2015);
        assert_eq!(body["filters_applied"]["year_end"], 2015);

        let (status, body) = get_json(app.clone(), "/data?limit=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("limit"));

        let (status, body) = get_json(app, "/data?sector=Energy&year=2024&sort_by=emission_value").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_records"], 3);
        assert_eq!(body["data"][0]["country"], "China");
        assert_eq!(body["data"][0]["sector"], "Energy");
    }

    #[tokio::test]
    async fn reference_endpoints() {
        let (_dir, app) = loaded_app();

        let (_, body) = get_json(app.clone(), "/years").await;
        assert_eq!(body["min"], 2000);
        assert_eq!(body["max"], 2024);
        assert_eq!(body["count"], 25);

        let (_, body) = get_json(app.clone(), "/countries?continent=Europe").await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["countries"][0]["iso"], "FRA");

        let (status, _) = get_json(app.clone(), "/countries?continent=Atlantis").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = get_json(app, "/sectors").await;
        assert_eq!(body["sectors"].as_array().unwrap().len(), 7);
        assert!(body.get("note").is_none());
    }

    #[tokio::test]
    async fn insights_for_latest_and_missing_year() {
        let (_dir, app) = loaded_app();
        let (status, body) = get_json(app.clone(), "/insights").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["year"], 2024);
        assert_eq!(body["global_emissions_mt"], 15700.0);
        assert_eq!(body["top_emitters"][0]["country"], "China");
        assert!(body["sector_breakdown"]["Energy"].as_f64().unwrap() > 0.0);

        let (status, body) = get_json(app, "/insights?year=1800").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "No data available for year 1800");
    }

    #[tokio::test]
    async fn persisted_insights_feed_health_and_latest_year_insights() {
        let (dir, app) = loaded_app();
        let rows: Vec<EmissionRecord> =
            artifacts::read_csv(&dir.path().join(artifacts::EMISSIONS_CSV)).unwrap();
        let generated_at = chrono::DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let insights = report::generate_insights(&rows, generated_at).unwrap();
        std::fs::write(
            dir.path().join(artifacts::INSIGHTS_JSON),
            serde_json::to_vec(&insights).unwrap(),
        )
        .unwrap();

        let (_, body) = get_json(app.clone(), "/health").await;
        assert_eq!(body["latest_year"], 2024);
        assert_eq!(body["insights_generated_at"], "2024-06-01T12:00:00+00:00");

        let (status, body) = get_json(app.clone(), "/insights").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["year"], 2024);
        assert_eq!(body["generated_at"], "2024-06-01T12:00:00Z");

        let (_, body) = get_json(app, "/insights?year=2010").await;
        assert_ne!(body["generated_at"], "2024-06-01T12:00:00Z");
    }

    #[tokio::test]
    async fn download_csv_is_an_attachment() {
        let (_dir, app) = loaded_app();
        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/download?format=csv&country=france&year=2020")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/csv");
        assert!(resp.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment; filename=emissions_data_"));
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().starts_with("France,FRA,2020,Europe,"));

        let (status, body) = get_json(app.clone(), "/download?format=json&year=2024").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);

        let (status, _) = get_json(app, "/download?format=xml").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn query_falls_back_without_a_model() {
        let (_dir, app) = loaded_app();
        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query":"Who are the top emitters?"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        let answer = body["answer"].as_str().unwrap();
        assert!(answer.contains("2024"));
        assert!(answer.contains("15700.0"));
        assert!(answer.contains("- China"));
        assert_eq!(body["data_context"]["total_countries"], 3);

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalidate_then_reload() {
        let dir = tempdir().unwrap();
        let app = app(state_for(dir.path()));
        let (status, _) = get_json(app.clone(), "/years").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        write_fixture(dir.path());
        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/cache/invalidate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let (status, body) = get_json(app.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["records_count"], 27);
        assert!(body["last_data_update"].is_string());

        let (_, body) = get_json(app, "/").await;
        assert_eq!(body["name"], API_TITLE);
    }

    #[test]
    fn cors_origins_parse_from_a_list() {
        assert_eq!(
            parse_origins(" https://a.example , ,https://b.example"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_origins("*").is_empty());
    }
}
