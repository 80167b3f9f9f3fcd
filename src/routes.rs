// HTTP routes: ingestion trigger/status, peer listing and details, network view.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::get, routing::post};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::coordinator::{Coordinator, CycleOutcome};
use crate::version::{NAME, VERSION};
use crate::views::{DEFAULT_LIMIT, Views};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) views: Views,
    pub(crate) coordinator: Arc<Coordinator>,
}

pub fn app(views: Views, coordinator: Arc<Coordinator>) -> Router {
    let state = AppState { views, coordinator };
    Router::new()
        .route("/", get(|| async { "podwatch: pNode network monitor" })) // GET /
        .route("/version", get(version_handler)) // GET /version
        .route("/api/ingest", post(ingest_handler)) // POST /api/ingest
        .route("/api/ingestion-status", get(ingestion_status_handler)) // GET /api/ingestion-status
        .route("/api/pnodes", get(pnodes_handler)) // GET /api/pnodes
        .route("/api/pnodes/{pubkey}/details", get(pnode_details_handler)) // GET /api/pnodes/:pubkey/details
        .route("/api/network", get(network_handler)) // GET /api/network
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

/// Maps repo/view errors onto a 500 with a JSON body; logs the chain once here.
struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": what })),
    )
        .into_response()
}

/// GET /version — returns service name and version (from Cargo.toml at build time).
async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// POST /api/ingest — runs one ingestion cycle now. 409 if one is in flight.
async fn ingest_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.coordinator.run_cycle().await? {
        CycleOutcome::Completed(summary) => Ok(Json(summary).into_response()),
        CycleOutcome::AlreadyRunning => Ok((
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "ingestion already running" })),
        )
            .into_response()),
    }
}

#[derive(Deserialize)]
struct StatusQuery {
    seed: Option<String>,
}

/// GET /api/ingestion-status?seed=<base_url> — last/current run, optionally per seed.
async fn ingestion_status_handler(
    State(state): State<AppState>,
    Query(q): Query<StatusQuery>,
) -> Result<Response, ApiError> {
    match state.views.run_status(q.seed.as_deref()).await? {
        Some(status) => Ok(Json(status).into_response()),
        None => Ok(not_found("no ingestion run recorded")),
    }
}

#[derive(Deserialize)]
struct PnodesQuery {
    limit: Option<i64>,
    offset: Option<i64>,
    seed: Option<String>,
}

/// GET /api/pnodes?limit=&offset=&seed= — paginated peer listing with latest stats.
async fn pnodes_handler(
    State(state): State<AppState>,
    Query(q): Query<PnodesQuery>,
) -> Result<Response, ApiError> {
    match state
        .views
        .peer_view(
            q.limit.unwrap_or(DEFAULT_LIMIT),
            q.offset.unwrap_or(0),
            q.seed.as_deref(),
        )
        .await?
    {
        Some(page) => Ok(Json(page).into_response()),
        None => Ok(not_found("unknown seed")),
    }
}

/// GET /api/pnodes/{pubkey}/details — deep per-peer view. 404 for unknown pubkeys.
async fn pnode_details_handler(
    State(state): State<AppState>,
    Path(pubkey): Path<String>,
) -> Result<Response, ApiError> {
    match state.views.peer_details(&pubkey).await? {
        Some(details) => Ok(Json(details).into_response()),
        None => Ok(not_found("unknown pubkey")),
    }
}

/// GET /api/network — latest network snapshot plus trend series. 404 before the first cycle.
async fn network_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.views.network_view().await? {
        Some(view) => Ok(Json(view).into_response()),
        None => Ok(not_found("no network snapshot yet")),
    }
}
