//! Foreman HTTP REST API
//!
//! Axum-based HTTP surface exposing the voice pipeline over HTTP, for
//! speech channels that cannot speak the Unix socket protocol and for
//! operator tooling. Runs alongside the IPC server.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a
//! pure inner function. The inner functions are directly testable without
//! axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health           — engine health and counters
//! - GET  /version          — server version info
//! - POST /command          — run one transcript through the pipeline
//! - POST /memory/search    — ranked retrieval over the memory store
//! - POST /session/close    — archive a session explicitly

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use foreman_core::ipc::VoiceRequest;

use crate::pipeline::Engine;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub engine: Arc<Engine>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/command", post(command_handler))
        .route("/memory/search", post(search_handler))
        .route("/session/close", post(close_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    engine: Arc<Engine>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!(
        "{}:{}",
        engine.config.http.host, engine.config.http.port
    );
    let state = HttpState { engine };

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub transcript: Option<String>,
    pub session_id: Option<Uuid>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub limit: Option<u32>,
    pub asset_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CloseRequest {
    pub session_id: Uuid,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — returns (status_code, json_body).
pub async fn health_inner(engine: &Engine) -> (StatusCode, serde_json::Value) {
    let response = engine.handle_request(VoiceRequest::Health).await;
    match response.data {
        Some(data) => (StatusCode::OK, data),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": response.error,
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "foreman/1",
    })
}

/// Inner command — validates the transcript and runs the pipeline.
pub async fn command_inner(
    engine: &Engine,
    req: CommandRequest,
) -> (StatusCode, serde_json::Value) {
    let transcript = match req.transcript {
        Some(t) if !t.trim().is_empty() => t,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "transcript field is required",
                    "status": "error",
                }),
            );
        }
    };

    let start = Instant::now();

    let response = engine
        .handle_request(VoiceRequest::Command {
            session_id: req.session_id,
            transcript,
            confidence: req.confidence,
        })
        .await;

    let took_ms = start.elapsed().as_millis() as u64;

    match response.data {
        Some(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("took_ms".to_string(), serde_json::json!(took_ms));
            }
            (StatusCode::OK, data)
        }
        None => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({
                "error": response.error,
                "status": "error",
            }),
        ),
    }
}

/// Inner search — delegates to the pipeline's retrieval path.
pub async fn search_inner(
    engine: &Engine,
    req: SearchRequest,
) -> (StatusCode, serde_json::Value) {
    let query = match req.query {
        Some(q) if !q.trim().is_empty() => q,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "query field is required",
                    "status": "error",
                }),
            );
        }
    };

    let start = Instant::now();

    let response = engine
        .handle_request(VoiceRequest::Search {
            query,
            limit: req.limit,
            asset_id: req.asset_id,
        })
        .await;

    match response.data {
        Some(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert(
                    "took_ms".to_string(),
                    serde_json::json!(start.elapsed().as_millis() as u64),
                );
            }
            (StatusCode::OK, data)
        }
        None => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({
                "error": response.error,
                "status": "error",
            }),
        ),
    }
}

/// Inner close — archives the session through the storage interface.
pub async fn close_inner(engine: &Engine, req: CloseRequest) -> (StatusCode, serde_json::Value) {
    let response = engine
        .handle_request(VoiceRequest::CloseSession {
            session_id: req.session_id,
        })
        .await;

    match response.data {
        Some(data) => (StatusCode::OK, data),
        None => (
            StatusCode::NOT_FOUND,
            serde_json::json!({
                "error": response.error,
                "status": "error",
            }),
        ),
    }
}

// ============================================================================
// Thin axum handlers
// ============================================================================

async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.engine).await;
    (status, Json(body))
}

async fn version_handler() -> impl IntoResponse {
    Json(version_inner())
}

async fn command_handler(
    State(state): State<HttpState>,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    let (status, body) = command_inner(&state.engine, req).await;
    (status, Json(body))
}

async fn search_handler(
    State(state): State<HttpState>,
    Json(req): Json<SearchRequest>,
) -> impl IntoResponse {
    let (status, body) = search_inner(&state.engine, req).await;
    (status, Json(body))
}

async fn close_handler(
    State(state): State<HttpState>,
    Json(req): Json<CloseRequest>,
) -> impl IntoResponse {
    let (status, body) = close_inner(&state.engine, req).await;
    (status, Json(body))
}
