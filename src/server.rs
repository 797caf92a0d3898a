//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload`, `/api/upload` | Analyze one PDF sent as multipart form data |
//! | `GET`  | `/history`, `/api/history` | Retained analyses, newest first |
//! | `GET`  | `/health` | Liveness, uptime and version |
//!
//! # Response Contract
//!
//! Success bodies carry `"success": true`. Every failure, including unknown
//! routes, returns the matching status with:
//!
//! ```json
//! { "success": false, "error": "File too large. Maximum size is 20 MB." }
//! ```
//!
//! Internal failures are logged in full and rendered as a generic notice.
//!
//! # Cancellation
//!
//! A client disconnect drops the handler future, which abandons the
//! in-flight analysis request. A PDF parse already running on the blocking
//! pool finishes on its own and its result is discarded.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{Config, ServerConfig};
use crate::error::PipelineError;
use crate::models::{AnalysisResult, FileMetadata, HistoryEntry};
use crate::pipeline::Pipeline;
use crate::upload::UploadError;

/// Room for multipart boundaries and part headers on top of the file cap.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    started: Instant,
}

/// Starts the server and runs until Ctrl-C.
///
/// Fails at startup when the analysis credential is missing, the history
/// store cannot be opened, or the address cannot be bound.
pub async fn run_server(config: &Config) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    info!(
        backend = %config.history.backend,
        capacity = pipeline.history().capacity(),
        "History store opened"
    );
    let app = router(Arc::new(pipeline), &config.server)?;

    let bind_addr = config.server.effective_bind();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(
        addr = %bind_addr,
        provider = %config.analysis.provider,
        model = config.analysis.model_name(),
        "VeriLex listening on http://{}",
        bind_addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Builds the application router around a ready pipeline.
pub fn router(pipeline: Arc<Pipeline>, server: &ServerConfig) -> Result<Router> {
    let body_limit = pipeline.gate().max_file_bytes() + MULTIPART_OVERHEAD_BYTES;
    let state = AppState {
        pipeline,
        started: Instant::now(),
    };

    let allow_origin = match &server.allowed_origin {
        Some(origin) => AllowOrigin::exact(
            HeaderValue::from_str(origin)
                .with_context(|| format!("Invalid server.allowed_origin: {}", origin))?,
        ),
        None => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = Router::new()
        .route("/upload", post(handle_upload))
        .route("/api/upload", post(handle_upload))
        .route("/history", get(handle_history))
        .route("/api/history", get(handle_history))
        .route("/health", get(handle_health))
        .fallback(handle_not_found)
        .layer(DefaultBodyLimit::max(body_limit as usize))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    Ok(app)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %err, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %err, "Request rejected");
        }
        AppError {
            status,
            message: err.client_message(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ POST /upload ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    file: FileMetadata,
    extracted_text: String,
    analysis: AnalysisResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    history_warning: Option<String>,
}

async fn handle_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart
        .map_err(|e| PipelineError::Validation(UploadError::Malformed(e.body_text())))?;

    let doc = state
        .pipeline
        .gate()
        .receive(&mut multipart)
        .await
        .map_err(PipelineError::Validation)?;
    info!(file = %doc.original_name, size = doc.size_bytes, "Upload received");

    let outcome = state.pipeline.run(doc).await?;

    Ok(Json(UploadResponse {
        success: true,
        file: outcome.file,
        extracted_text: outcome.extracted_text,
        analysis: outcome.analysis,
        history_warning: outcome.history_warning,
    }))
}

// ============ GET /history ============

#[derive(Serialize)]
struct HistoryResponse {
    success: bool,
    history: Vec<HistoryEntry>,
}

async fn handle_history(State(state): State<AppState>) -> Result<Json<HistoryResponse>, AppError> {
    let history = state
        .pipeline
        .history()
        .list_all()
        .await
        .map_err(|e| PipelineError::Internal(format!("history listing failed: {:#}", e)))?;

    Ok(Json(HistoryResponse {
        success: true,
        history,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    timestamp: DateTime<Utc>,
    uptime_secs: u64,
    version: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        uptime_secs: state.started.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_not_found() -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        message: "Route not found.".to_string(),
    }
}
