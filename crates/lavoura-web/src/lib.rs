//! Axum HTTP API over the production store and the ingestion pipeline.
//!
//! Read endpoints are public; ingestion and deletion require a bearer token
//! issued by `POST /token`. Route paths and JSON field names keep the
//! original Portuguese API surface so existing consumers keep working.

pub mod auth;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Form, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use lavoura_core::{latest_supported_year, ProductionRecord, FIRST_SUPPORTED_YEAR};
use lavoura_ingest::{IngestConfig, IngestError, IngestPipeline};
use lavoura_sidra::MetricSource;
use lavoura_store::ProductionStore;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::error;

use auth::{AuthConfig, Authenticated};

pub const CRATE_NAME: &str = "lavoura-web";

/// Hard cap on (municipalities x years) combinations per batch query.
pub const MAX_BATCH_COMBINATIONS: usize = 100;

const BRAZILIAN_STATES: [&str; 27] = [
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB",
    "PR", "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

pub struct AppState<S, P> {
    pub pipeline: Arc<IngestPipeline<S, P>>,
    pub auth: Arc<AuthConfig>,
    pub ingest: IngestConfig,
}

impl<S, P> Clone for AppState<S, P> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            auth: Arc::clone(&self.auth),
            ingest: self.ingest,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::InsufficientData { .. } | IngestError::BatchPartialFailure { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<lavoura_store::StoreError> for ApiError {
    fn from(err: lavoura_store::StoreError) -> Self {
        ApiError::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(ApiResponse::<()>::failure("invalid credentials")),
            )
                .into_response(),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<()>::failure(&message)),
            )
                .into_response(),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<()>::failure(&message)),
            )
                .into_response(),
            ApiError::Internal(err) => {
                error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::<()>::failure("internal server error")),
                )
                    .into_response()
            }
        }
    }
}

/// Uniform response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: Option<T>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: message.into(),
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            success: false,
            data: None,
            message: message.to_string(),
        }
    }
}

/// Persisted row in the original wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionDto {
    pub municipio_id: i64,
    pub ano: i32,
    pub area_colhida: i64,
    pub quantidade_produzida: i64,
}

impl From<ProductionRecord> for ProductionDto {
    fn from(record: ProductionRecord) -> Self {
        Self {
            municipio_id: record.municipality_id,
            ano: record.year,
            area_colhida: record.area,
            quantidade_produzida: record.quantity,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Deserialize)]
pub struct StatesQuery {
    /// Comma-separated two-letter state codes, e.g. `estados=SC,RS,PR`.
    pub estados: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchQueryRequest {
    pub municipios: Vec<i64>,
    pub anos: Vec<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateProductivityDto {
    pub estado: String,
    pub produtividade: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HarvestedAreaDto {
    pub area_colhida: i64,
}

fn validate_year(year: i32) -> Result<(), ApiError> {
    let last = latest_supported_year();
    if year < FIRST_SUPPORTED_YEAR || year > last {
        return Err(ApiError::BadRequest(format!(
            "year must be between {FIRST_SUPPORTED_YEAR} and {last}"
        )));
    }
    Ok(())
}

fn validate_states(states: &[String]) -> Result<(), ApiError> {
    for state in states {
        if !BRAZILIAN_STATES.contains(&state.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "'{state}' is not a valid two-letter Brazilian state code"
            )));
        }
    }
    Ok(())
}

fn validate_batch_request(request: &BatchQueryRequest) -> Result<(), ApiError> {
    let combinations = request.municipios.len() * request.anos.len();
    if combinations > MAX_BATCH_COMBINATIONS {
        return Err(ApiError::BadRequest(format!(
            "request exceeds the limit of {MAX_BATCH_COMBINATIONS} data points"
        )));
    }
    for municipality in &request.municipios {
        if *municipality <= 0 || *municipality > 9_999_999 {
            return Err(ApiError::BadRequest(format!(
                "municipality code {municipality} must have at most 7 digits"
            )));
        }
    }
    for year in &request.anos {
        validate_year(*year)?;
    }
    Ok(())
}

pub fn app<S, P>(state: AppState<S, P>) -> Router
where
    S: MetricSource + 'static,
    P: ProductionStore + 'static,
{
    Router::new()
        .route("/token", post(token_handler))
        .route("/municipio/processar", post(process_range_handler))
        .route("/municipio/processar/{ano}", post(process_year_handler))
        .route("/municipio/deletar/{ano}", delete(delete_year_handler))
        // The all-years lookup lives under /municipios/ so the router can
        // tell it apart from /municipio/{ano}/{codigo_municipio}.
        .route("/municipios/{codigo_municipio}", get(municipality_handler))
        .route(
            "/municipio/{ano}/{codigo_municipio}",
            get(municipality_year_handler),
        )
        .route(
            "/municipio/area_colhida/{ano}/{codigo_municipio}",
            get(harvested_area_handler),
        )
        .route("/produtividade/{ano}/estados", get(productivity_handler))
        .route(
            "/municipios/quantidade_produzida",
            post(batch_quantity_handler),
        )
        .with_state(state)
}

async fn token_handler<S, P>(
    State(state): State<AppState<S, P>>,
    Form(request): Form<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError>
where
    S: MetricSource + 'static,
    P: ProductionStore + 'static,
{
    if request.username != state.auth.username || request.password != state.auth.password {
        return Err(ApiError::Unauthorized);
    }
    let token = auth::issue_token(
        &request.username,
        chrono::Utc::now().timestamp(),
        &state.auth.token_secret,
    );
    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
    }))
}

async fn process_range_handler<S, P>(
    _auth: Authenticated,
    State(state): State<AppState<S, P>>,
) -> Result<Json<ApiResponse<()>>, ApiError>
where
    S: MetricSource + 'static,
    P: ProductionStore + 'static,
{
    let summary = state
        .pipeline
        .process_range(state.ingest.first_year, state.ingest.end_year)
        .await?;
    Ok(Json(ApiResponse::ok(
        None,
        format!("data processed successfully for years {:?}", summary.processed),
    )))
}

async fn process_year_handler<S, P>(
    _auth: Authenticated,
    State(state): State<AppState<S, P>>,
    Path(year): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ApiError>
where
    S: MetricSource + 'static,
    P: ProductionStore + 'static,
{
    validate_year(year)?;
    state.pipeline.process_year(year).await?;
    Ok(Json(ApiResponse::ok(
        None,
        format!("data processed successfully for year {year}"),
    )))
}

async fn delete_year_handler<S, P>(
    _auth: Authenticated,
    State(state): State<AppState<S, P>>,
    Path(year): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ApiError>
where
    S: MetricSource + 'static,
    P: ProductionStore + 'static,
{
    validate_year(year)?;
    state.pipeline.store().delete_year(year).await?;
    Ok(Json(ApiResponse::ok(
        None,
        format!("data deleted successfully for year {year}"),
    )))
}

async fn municipality_handler<S, P>(
    State(state): State<AppState<S, P>>,
    Path(municipality_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<ProductionDto>>>, ApiError>
where
    S: MetricSource + 'static,
    P: ProductionStore + 'static,
{
    let rows = state.pipeline.store().by_municipality(municipality_id).await?;
    if rows.is_empty() {
        return Err(ApiError::NotFound("municipality not found".to_string()));
    }
    Ok(Json(ApiResponse::ok(
        Some(rows.into_iter().map(ProductionDto::from).collect()),
        "",
    )))
}

async fn municipality_year_handler<S, P>(
    State(state): State<AppState<S, P>>,
    Path((year, municipality_id)): Path<(i32, i64)>,
) -> Result<Json<ApiResponse<Vec<ProductionDto>>>, ApiError>
where
    S: MetricSource + 'static,
    P: ProductionStore + 'static,
{
    validate_year(year)?;
    let record = state
        .pipeline
        .store()
        .by_year_and_municipality(year, municipality_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("municipality not found".to_string()))?;
    Ok(Json(ApiResponse::ok(Some(vec![record.into()]), "")))
}

async fn harvested_area_handler<S, P>(
    State(state): State<AppState<S, P>>,
    Path((year, municipality_id)): Path<(i32, i64)>,
) -> Result<Json<ApiResponse<HarvestedAreaDto>>, ApiError>
where
    S: MetricSource + 'static,
    P: ProductionStore + 'static,
{
    validate_year(year)?;
    let record = state
        .pipeline
        .store()
        .by_year_and_municipality(year, municipality_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("municipality not found".to_string()))?;
    Ok(Json(ApiResponse::ok(
        Some(HarvestedAreaDto {
            area_colhida: record.area,
        }),
        "",
    )))
}

async fn productivity_handler<S, P>(
    State(state): State<AppState<S, P>>,
    Path(year): Path<i32>,
    Query(query): Query<StatesQuery>,
) -> Result<Json<ApiResponse<Vec<StateProductivityDto>>>, ApiError>
where
    S: MetricSource + 'static,
    P: ProductionStore + 'static,
{
    validate_year(year)?;
    let states: Vec<String> = query
        .estados
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if states.is_empty() {
        return Err(ApiError::BadRequest(
            "at least one state code is required".to_string(),
        ));
    }
    validate_states(&states)?;

    let rows = state
        .pipeline
        .store()
        .state_productivity(year, &states)
        .await?;
    if rows.is_empty() {
        return Err(ApiError::NotFound("no data found".to_string()));
    }
    Ok(Json(ApiResponse::ok(
        Some(
            rows.into_iter()
                .map(|row| StateProductivityDto {
                    estado: row.state,
                    produtividade: row.productivity,
                })
                .collect(),
        ),
        "",
    )))
}

async fn batch_quantity_handler<S, P>(
    State(state): State<AppState<S, P>>,
    Json(request): Json<BatchQueryRequest>,
) -> Result<Json<ApiResponse<BTreeMap<i32, BTreeMap<i64, i64>>>>, ApiError>
where
    S: MetricSource + 'static,
    P: ProductionStore + 'static,
{
    validate_batch_request(&request)?;
    let rows = state
        .pipeline
        .store()
        .by_municipalities_and_years(&request.municipios, &request.anos)
        .await?;
    if rows.is_empty() {
        return Err(ApiError::NotFound("no data found".to_string()));
    }
    Ok(Json(ApiResponse::ok(Some(pivot_quantities(&rows)), "")))
}

/// Pivot rows into a `year -> municipality -> quantity produced` mapping.
fn pivot_quantities(rows: &[ProductionRecord]) -> BTreeMap<i32, BTreeMap<i64, i64>> {
    let mut out: BTreeMap<i32, BTreeMap<i64, i64>> = BTreeMap::new();
    for row in rows {
        out.entry(row.year)
            .or_default()
            .insert(row.municipality_id, row.quantity);
    }
    out
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("LAVOURA_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }
}

/// Connect to Postgres and SIDRA from env config and serve the API.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let store =
        lavoura_store::PgProductionStore::connect(&lavoura_store::StoreConfig::from_env()).await?;
    let source = lavoura_sidra::SidraClient::new(lavoura_sidra::SidraConfig::from_env())?;
    let state = AppState {
        pipeline: Arc::new(IngestPipeline::new(source, store)),
        auth: Arc::new(AuthConfig::from_env()),
        ingest: IngestConfig::from_env(),
    };
    let config = WebConfig::from_env();
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
