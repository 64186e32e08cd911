//! HTTP server.
//!
//! Exposes detection, the ranked read path, feedback, config edits, and the
//! tuning job as a JSON API for the reader UI and the external job system.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/detect` | Run detection for a document version |
//! | `POST` | `/connections` | Ranked connections for visible chunks |
//! | `POST` | `/feedback` | Record validate / reject / star |
//! | `GET`  | `/config/{user_id}` | Current engine config and tuner state |
//! | `PATCH`| `/config/{user_id}` | Partial engine config edit |
//! | `POST` | `/tune/{user_id}` | Run one tuning cycle |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unknown engine: 'x'" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `timeout` (408), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser-based reader
//! can call the API directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use synthesis_core::error::SynthesisError;
use synthesis_core::models::{Feedback, FeedbackAction, FeedbackContext};
use synthesis_core::ranking::RankedConnection;
use synthesis_core::weights::{EngineConfigPatch, WeightState};

use crate::config::Config;
use crate::feedback::record_feedback;
use crate::query::{get_connections_for_chunks, load_or_init_state, update_engine_config};
use crate::sqlite_store::open_store;
use crate::synthesis::{DetectionReport, Synthesizer};
use crate::tune::{tune, TuneReport};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    synthesizer: Arc<Synthesizer>,
}

impl AppState {
    pub fn new(config: Arc<Config>, synthesizer: Arc<Synthesizer>) -> Self {
        Self {
            config,
            synthesizer,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/detect", post(handle_detect))
        .route("/connections", post(handle_connections))
        .route("/feedback", post(handle_feedback))
        .route(
            "/config/{user_id}",
            get(handle_get_config).patch(handle_patch_config),
        )
        .route("/tune/{user_id}", post(handle_tune))
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server] bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let store = open_store(config).await?;
    let synthesizer = Arc::new(Synthesizer::from_config(store, config));
    let state = AppState::new(Arc::new(config.clone()), synthesizer);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "server listening");
    println!("Synthesis server listening on http://{}", bind_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let (status, code) = match err.downcast_ref::<SynthesisError>() {
            Some(SynthesisError::UnknownConnection(_)) | Some(SynthesisError::NoChunks { .. }) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            Some(SynthesisError::UnknownEngine(_))
            | Some(SynthesisError::UnknownAction(_))
            | Some(SynthesisError::InvalidWeight { .. })
            | Some(SynthesisError::InvalidLimits(_))
            | Some(SynthesisError::InvalidPriority(_)) => (StatusCode::BAD_REQUEST, "bad_request"),
            Some(SynthesisError::VersionExists { .. }) | Some(SynthesisError::ChunkIdTaken { .. }) => {
                (StatusCode::CONFLICT, "conflict")
            }
            Some(SynthesisError::DetectionTimedOut { .. }) => {
                (StatusCode::REQUEST_TIMEOUT, "timeout")
            }
            None => {
                tracing::error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        AppError {
            status,
            code,
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

// ============ POST /detect ============

#[derive(Deserialize)]
struct DetectRequest {
    document_id: String,
    version_id: String,
    #[serde(default)]
    user_id: Option<String>,
}

async fn handle_detect(
    State(state): State<AppState>,
    Json(req): Json<DetectRequest>,
) -> Result<Json<DetectionReport>, AppError> {
    if req.document_id.trim().is_empty() || req.version_id.trim().is_empty() {
        return Err(bad_request("document_id and version_id must not be empty"));
    }
    let user_id = req
        .user_id
        .unwrap_or_else(|| state.config.user.default_id.clone());
    let store = state.synthesizer.store().clone();
    let weights = load_or_init_state(store.as_ref(), &state.config, &user_id).await?;
    let report = state
        .synthesizer
        .detect_all(&req.document_id, &req.version_id, &weights.config)
        .await?;
    Ok(Json(report))
}

// ============ POST /connections ============

#[derive(Deserialize)]
struct ConnectionsRequest {
    chunk_ids: Vec<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ConnectionsResponse {
    connections: Vec<RankedConnection>,
}

async fn handle_connections(
    State(state): State<AppState>,
    Json(req): Json<ConnectionsRequest>,
) -> Result<Json<ConnectionsResponse>, AppError> {
    let user_id = req
        .user_id
        .unwrap_or_else(|| state.config.user.default_id.clone());
    let store = state.synthesizer.store().clone();
    let weights = load_or_init_state(store.as_ref(), &state.config, &user_id).await?;
    let mut connections =
        get_connections_for_chunks(store.as_ref(), &req.chunk_ids, &weights.config, Utc::now())
            .await?;
    if let Some(limit) = req.limit {
        connections.truncate(limit);
    }
    Ok(Json(ConnectionsResponse { connections }))
}

// ============ POST /feedback ============

#[derive(Deserialize)]
struct FeedbackRequest {
    connection_id: String,
    action: String,
    #[serde(default)]
    context: FeedbackContext,
}

async fn handle_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<Feedback>, AppError> {
    let action: FeedbackAction = req
        .action
        .parse()
        .map_err(|e: SynthesisError| bad_request(e.to_string()))?;
    let store = state.synthesizer.store().clone();
    let feedback = record_feedback(
        store.as_ref(),
        &state.config,
        &req.connection_id,
        action,
        req.context,
    )
    .await?;
    Ok(Json(feedback))
}

// ============ GET|PATCH /config/{user_id} ============

async fn handle_get_config(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<WeightState>, AppError> {
    let store = state.synthesizer.store().clone();
    let weights = load_or_init_state(store.as_ref(), &state.config, &user_id).await?;
    Ok(Json(weights))
}

async fn handle_patch_config(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(patch): Json<EngineConfigPatch>,
) -> Result<Json<WeightState>, AppError> {
    let store = state.synthesizer.store().clone();
    let weights = update_engine_config(store.as_ref(), &state.config, &user_id, &patch).await?;
    Ok(Json(weights))
}

// ============ POST /tune/{user_id} ============

async fn handle_tune(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<TuneReport>, AppError> {
    let store = state.synthesizer.store().clone();
    let report = tune(store.as_ref(), &state.config, &user_id, Utc::now()).await?;
    Ok(Json(report))
}
