//! HTTP API.
//!
//! Serves the interactive bill browser, the bulk CSV export, and the
//! expense forecast as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/bills?direction=first\|next\|previous` | Fetch a page of bills |
//! | `POST` | `/bills/sort` | Re-order the current page: `{"key": "amount", "direction": "asc"}` |
//! | `GET`  | `/bills/export` | Download every bill as CSV |
//! | `GET`  | `/forecast` | Sync the caller's ledger and return the forecast |
//!
//! # Authentication
//!
//! Every route except `/health` requires `Authorization: Bearer <token>`.
//! Tokens map to entity ids in `[server.api_keys]`. Each entity gets its
//! own crawl controller; a second navigation request while one is still
//! fetching is rejected with `409 busy`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "User not found in database" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `busy` (409), `upstream` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};

use billcast_core::models::{ForecastReport, SortDirection, SortKey, FETCH_FAILED_NOTICE};
use billcast_core::source::MessageSource;

use crate::config::Config;
use crate::crawl::{CrawlController, CrawlView, FetchOutcome, PageDirection};
use crate::error::SourceError;
use crate::export::{export_filename, run_bulk_export, to_csv, ExportSettings};
use crate::forecast::{SyncForecastEngine, UNKNOWN_ENTITY};
use crate::ledger::SqliteLedger;
use crate::progress::NoProgress;
use crate::sources::open_source;
use crate::warehouse::SqliteWarehouse;

type SharedCrawl = Arc<tokio::sync::Mutex<CrawlController>>;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    source: Arc<dyn MessageSource>,
    engine: Arc<SyncForecastEngine>,
    /// One crawl controller per entity.
    crawls: Arc<Mutex<HashMap<String, SharedCrawl>>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn MessageSource>,
        engine: Arc<SyncForecastEngine>,
    ) -> Self {
        Self {
            config,
            source,
            engine,
            crawls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn crawl_for(&self, entity: &str) -> Result<SharedCrawl, AppError> {
        let mut crawls = self
            .crawls
            .lock()
            .map_err(|_| internal("crawl registry poisoned"))?;
        let crawl = crawls.entry(entity.to_string()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(CrawlController::new(
                self.source.clone(),
                self.config.source.listing_query.clone(),
                self.config.source.page_size,
            )))
        });
        Ok(crawl.clone())
    }

    /// Entity id for the request's bearer token.
    fn authenticate(&self, headers: &HeaderMap) -> Result<String, AppError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| unauthorized("missing bearer token"))?;
        self.config
            .server
            .api_keys
            .get(token.trim())
            .cloned()
            .ok_or_else(|| unauthorized("unknown bearer token"))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/bills", get(handle_bills))
        .route("/bills/sort", post(handle_sort))
        .route("/bills/export", get(handle_export))
        .route("/forecast", get(handle_forecast))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    if config.server.api_keys.is_empty() {
        log::warn!("No [server.api_keys] configured; every authenticated route will return 401");
    }

    let source = open_source(config)?;
    let ledger = Arc::new(SqliteLedger::open(config).await?);
    let warehouse = Arc::new(SqliteWarehouse::open(config).await?);
    let engine = Arc::new(SyncForecastEngine::new(
        ledger,
        warehouse,
        config.forecast.clone(),
    ));
    let state = AppState::new(Arc::new(config.clone()), source, engine);

    println!("billcast listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Error response
// ═══════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"busy"`).
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    app_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn busy(message: impl Into<String>) -> AppError {
    app_error(StatusCode::CONFLICT, "busy", message)
}

fn internal(message: impl Into<String>) -> AppError {
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Source failures: rejected credentials become 401, anything else 502.
fn classify_source_error(context: &str, err: &anyhow::Error) -> AppError {
    let rejected = err
        .chain()
        .any(|c| matches!(c.downcast_ref::<SourceError>(), Some(SourceError::Unauthorized)));
    if rejected {
        unauthorized(format!("{}: {}", context, err))
    } else {
        app_error(
            StatusCode::BAD_GATEWAY,
            "upstream",
            format!("{}: {:#}", context, err),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════
// GET /health
// ═══════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Bills
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct BillsQuery {
    direction: Option<String>,
}

/// Navigate the caller's crawl. A refused navigation (no next page, or
/// already on the first) returns the current view unchanged.
async fn handle_bills(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BillsQuery>,
) -> Result<Json<CrawlView>, AppError> {
    let entity = state.authenticate(&headers)?;
    let direction: PageDirection = query
        .direction
        .as_deref()
        .unwrap_or("first")
        .parse()
        .map_err(|e: anyhow::Error| bad_request(e.to_string()))?;

    let crawl = state.crawl_for(&entity)?;
    let mut controller = crawl
        .try_lock()
        .map_err(|_| busy("a page fetch is already in progress"))?;

    match controller.fetch_page(direction).await {
        FetchOutcome::Loaded | FetchOutcome::Refused => Ok(Json(controller.view())),
        FetchOutcome::Failed(e) => Err(classify_source_error(FETCH_FAILED_NOTICE, &e)),
    }
}

#[derive(Deserialize)]
struct SortRequest {
    key: String,
    direction: Option<String>,
}

/// Re-order the held page. Omitting `direction` toggles it.
async fn handle_sort(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SortRequest>,
) -> Result<Json<CrawlView>, AppError> {
    let entity = state.authenticate(&headers)?;
    let key: SortKey = req
        .key
        .parse()
        .map_err(|e: anyhow::Error| bad_request(e.to_string()))?;
    let direction = match req.direction.as_deref() {
        Some(d) => Some(
            d.parse::<SortDirection>()
                .map_err(|e: anyhow::Error| bad_request(e.to_string()))?,
        ),
        None => None,
    };

    let crawl = state.crawl_for(&entity)?;
    let mut controller = crawl
        .try_lock()
        .map_err(|_| busy("a page fetch is already in progress"))?;
    controller.sort_by(key, direction);
    Ok(Json(controller.view()))
}

async fn handle_export(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    state.authenticate(&headers)?;

    let settings = ExportSettings::from(&state.config.export);
    let report = run_bulk_export(state.source.as_ref(), &settings, &NoProgress)
        .await
        .map_err(|e| classify_source_error("Failed to export bills", &e))?;
    let csv = to_csv(&report.rows).map_err(|e| internal(e.to_string()))?;

    let filename = export_filename(chrono::Local::now().date_naive());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        csv,
    )
        .into_response())
}

// ═══════════════════════════════════════════════════════════════════════
// GET /forecast
// ═══════════════════════════════════════════════════════════════════════

async fn handle_forecast(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ForecastReport>, AppError> {
    let entity = state.authenticate(&headers)?;

    let exists = state
        .engine
        .entity_exists(&entity)
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;
    if !exists {
        return Err(not_found(UNKNOWN_ENTITY));
    }

    let today = chrono::Local::now().date_naive();
    let report = state.engine.run(&entity, today).await.map_err(|e| {
        log::error!("Forecast for {} failed: {:#}", entity, e);
        internal(format!("{:#}", e))
    })?;
    Ok(Json(report))
}
