//! JSON HTTP API over a screening [`Session`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/corpus` | List corpus items with indexing state |
//! | `POST` | `/corpus` | Add items: `{"items":[{"name", "data_url" \| "url"}]}` |
//! | `DELETE` | `/corpus/{id}` | Remove an item |
//! | `POST` | `/corpus/{id}/reindex` | Reset a failed item for re-indexing |
//! | `PUT`  | `/query` | Set the query image: `{"name", "data_url" \| "url"}` |
//! | `POST` | `/runs` | Run a screening and return the ranked report |
//! | `GET`  | `/status` | Current run status |
//! | `GET`  | `/results` | Ranked results, selection, refined suggestion |
//! | `POST` | `/results/{id}/select` | Select a result |
//! | `POST` | `/results/selected/refine` | Refine the selected result's suggestion |
//! | `GET`  | `/history` | Past runs, newest first |
//! | `POST` | `/history/{id}/load` | Replay a past run |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "no query image has been set" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use image_guard_core::history::HistoryRecord;
use image_guard_core::models::{AnalysisResult, CorpusItem, ImageRef, QueryImage, RunStatus};
use image_guard_core::GuardError;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::indexer::IntervalTicker;
use crate::resolve::image_ref_from_str;
use crate::session::{HistorySummary, ResultsView, RunOutcome, Session};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    session: Arc<Session>,
}

/// Build the API router for `session`.
pub fn router(session: Arc<Session>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/corpus", get(handle_list_corpus).post(handle_add_corpus))
        .route("/corpus/{id}", delete(handle_remove_corpus))
        .route("/corpus/{id}/reindex", post(handle_reindex))
        .route("/query", put(handle_set_query))
        .route("/runs", post(handle_start_run))
        .route("/status", get(handle_status))
        .route("/results", get(handle_results))
        .route("/results/selected/refine", post(handle_refine))
        .route("/results/{id}/select", post(handle_select))
        .route("/history", get(handle_history))
        .route("/history/{id}/load", post(handle_load_history))
        .layer(cors)
        .with_state(AppState { session })
}

/// Start the background indexer and serve the API on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config, session: Arc<Session>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let indexer = session.indexer();
    let interval = config.indexer.interval();
    tokio::spawn(async move {
        indexer.run(IntervalTicker::new(interval)).await;
    });

    let app = router(session);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "image guard listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<GuardError> for AppError {
    fn from(err: GuardError) -> Self {
        let message = err.to_string();
        match err {
            GuardError::NotFound(_) => not_found(message),
            GuardError::InvalidInput(_) | GuardError::NoQuery | GuardError::EmptyCorpus => {
                bad_request(message)
            }
            GuardError::RunInProgress | GuardError::InvalidTransition { .. } => conflict(message),
            _ => internal(message),
        }
    }
}

// ============ Request bodies ============

/// An image supplied by the client. Exactly one source must be set.
#[derive(Deserialize)]
struct ImageSource {
    name: String,
    #[serde(default)]
    data_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl ImageSource {
    fn into_parts(self) -> Result<(String, ImageRef), AppError> {
        if self.name.trim().is_empty() {
            return Err(bad_request("name must not be empty"));
        }
        let sources: Vec<&String> = [&self.data_url, &self.url]
            .into_iter()
            .flatten()
            .collect();
        let source = match sources.as_slice() {
            [one] => one.as_str(),
            [] => return Err(bad_request(format!("{}: one of data_url or url is required", self.name))),
            _ => return Err(bad_request(format!("{}: only one of data_url or url may be set", self.name))),
        };
        if self.url.is_some() && !(source.starts_with("http://") || source.starts_with("https://")) {
            return Err(bad_request(format!("{}: url must be http(s)", self.name)));
        }
        if self.data_url.is_some() && !source.starts_with("data:") {
            return Err(bad_request(format!("{}: data_url must start with data:", self.name)));
        }
        let image = image_ref_from_str(source)
            .map_err(|e| bad_request(format!("{}: {}", self.name, e)))?;
        Ok((self.name, image))
    }
}

#[derive(Deserialize)]
struct AddCorpusRequest {
    items: Vec<ImageSource>,
}

#[derive(Serialize)]
struct AddCorpusResponse {
    ids: Vec<String>,
}

#[derive(Serialize)]
struct RemovedResponse {
    removed: String,
}

#[derive(Serialize)]
struct RefineResponse {
    refined_suggestion: Option<String>,
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_list_corpus(State(state): State<AppState>) -> Json<Vec<CorpusItem>> {
    Json(state.session.list_corpus())
}

async fn handle_add_corpus(
    State(state): State<AppState>,
    Json(req): Json<AddCorpusRequest>,
) -> Result<(StatusCode, Json<AddCorpusResponse>), AppError> {
    if req.items.is_empty() {
        return Err(bad_request("items must not be empty"));
    }
    let items = req
        .items
        .into_iter()
        .map(|src| src.into_parts().map(|(name, image)| CorpusItem::new(name, image)))
        .collect::<Result<Vec<_>, _>>()?;
    let ids = state.session.add_items(items);
    Ok((StatusCode::CREATED, Json(AddCorpusResponse { ids })))
}

async fn handle_remove_corpus(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RemovedResponse>, AppError> {
    let removed = state.session.remove_item(&id)?;
    Ok(Json(RemovedResponse { removed: removed.id }))
}

async fn handle_reindex(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CorpusItem>, AppError> {
    Ok(Json(state.session.reindex(&id)?))
}

async fn handle_set_query(
    State(state): State<AppState>,
    Json(src): Json<ImageSource>,
) -> Result<Json<QueryImage>, AppError> {
    let (name, image) = src.into_parts()?;
    Ok(Json(state.session.set_query(&name, image).await?))
}

async fn handle_start_run(State(state): State<AppState>) -> Result<Json<RunOutcome>, AppError> {
    Ok(Json(state.session.start_run().await?))
}

async fn handle_status(State(state): State<AppState>) -> Json<RunStatus> {
    Json(state.session.status())
}

async fn handle_results(State(state): State<AppState>) -> Json<ResultsView> {
    Json(state.session.results())
}

async fn handle_select(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisResult>, AppError> {
    Ok(Json(state.session.select_result(&id)?))
}

async fn handle_refine(State(state): State<AppState>) -> Result<Json<RefineResponse>, AppError> {
    let refined_suggestion = state.session.refine_selected().await?;
    Ok(Json(RefineResponse { refined_suggestion }))
}

async fn handle_history(State(state): State<AppState>) -> Json<Vec<HistorySummary>> {
    Json(state.session.history())
}

async fn handle_load_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryRecord>, AppError> {
    Ok(Json(state.session.load_history(&id)?))
}
