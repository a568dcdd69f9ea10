//! Read-only JSON HTTP API over imports and deliveries.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/deliveries?since=&until=&location=&limit=` | Stored deliveries, newest date first |
//! | `GET`  | `/imports?state=&limit=` | Imports, newest first |
//! | `GET`  | `/imports/{id}` | One import |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid since date: 2025-13-01" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser dashboards
//! can read the schedule directly.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::error::PipelineError;
use crate::importer::DATE_FORMAT;
use crate::models::{DeliveryRecord, Import, ImportState};
use crate::store::{DeliveryQuery, ImportStore};

const MAX_LIMIT: i64 = 1000;

#[derive(Clone)]
struct AppState {
    store: ImportStore,
}

/// Build the API router over `store`.
pub fn router(store: ImportStore) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/deliveries", get(handle_deliveries))
        .route("/imports", get(handle_imports))
        .route("/imports/{id}", get(handle_get_import))
        .layer(cors)
        .with_state(AppState { store })
}

/// Serve the API on `bind` until `shutdown` becomes true.
pub async fn serve(
    store: ImportStore,
    bind: &str,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind = %bind, "HTTP server listening");
    println!("Read API listening on http://{}", bind);

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Connect to the configured database and serve on `[server] bind`.
pub async fn run_server(config: &Config, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    serve(ImportStore::new(pool), &config.server.bind, shutdown).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

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

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        tracing::error!(error = %err, "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn parse_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    value
        .map(|v| {
            NaiveDate::parse_from_str(v, DATE_FORMAT)
                .map_err(|_| bad_request(format!("invalid {} date: {}", field, v)))
        })
        .transpose()
}

fn parse_limit(value: Option<&str>, default: i64) -> Result<i64, AppError> {
    let Some(v) = value else {
        return Ok(default);
    };
    match v.parse::<i64>() {
        Ok(n) if (1..=MAX_LIMIT).contains(&n) => Ok(n),
        _ => Err(bad_request(format!(
            "limit must be between 1 and {}: {}",
            MAX_LIMIT, v
        ))),
    }
}

// ============ GET /health ============

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

// ============ GET /deliveries ============

#[derive(Deserialize)]
struct DeliveriesParams {
    since: Option<String>,
    until: Option<String>,
    location: Option<String>,
    limit: Option<String>,
}

#[derive(Serialize)]
struct DeliveriesResponse {
    count: usize,
    deliveries: Vec<DeliveryRecord>,
}

async fn handle_deliveries(
    State(state): State<AppState>,
    Query(params): Query<DeliveriesParams>,
) -> Result<Json<DeliveriesResponse>, AppError> {
    let since = parse_date("since", params.since.as_deref())?;
    let until = parse_date("until", params.until.as_deref())?;
    if let (Some(s), Some(u)) = (since, until) {
        if s > u {
            return Err(bad_request("since must not be after until"));
        }
    }

    let query = DeliveryQuery {
        since,
        until,
        location: params.location.filter(|l| !l.trim().is_empty()),
        limit: parse_limit(params.limit.as_deref(), DeliveryQuery::default().limit)?,
    };

    let deliveries = state.store.list_deliveries(&query).await?;
    Ok(Json(DeliveriesResponse {
        count: deliveries.len(),
        deliveries,
    }))
}

// ============ GET /imports ============

#[derive(Deserialize)]
struct ImportsParams {
    state: Option<String>,
    limit: Option<String>,
}

#[derive(Serialize)]
struct ImportsResponse {
    imports: Vec<Import>,
}

async fn handle_imports(
    State(state): State<AppState>,
    Query(params): Query<ImportsParams>,
) -> Result<Json<ImportsResponse>, AppError> {
    let filter = params
        .state
        .as_deref()
        .map(|s| s.parse::<ImportState>().map_err(|e| bad_request(e.to_string())))
        .transpose()?;
    let limit = parse_limit(params.limit.as_deref(), 50)?;

    let imports = state.store.list_imports(filter, limit).await?;
    Ok(Json(ImportsResponse { imports }))
}

// ============ GET /imports/{id} ============

async fn handle_get_import(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Import>, AppError> {
    let id: i64 = id
        .parse()
        .map_err(|_| bad_request(format!("invalid import id: {}", id)))?;

    state
        .store
        .get_import(id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("import not found: {}", id)))
}
