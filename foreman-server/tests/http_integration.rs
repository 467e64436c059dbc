//! HTTP integration tests for the Foreman REST API
//!
//! These use both the inner-function approach (direct, no dispatch
//! machinery) and the Axum `oneshot` approach for full end-to-end handler
//! tests. The engine runs with in-memory collaborators, so no external
//! services are required.

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;

use foreman_core::config::{
    AssetsConfig, ComposerConfig, EmbeddingSection, ExtractorConfig, ForemanConfig, HttpConfig,
    MemoryConfig, OrchestratorConfig, ServiceConfig, SessionConfig, StorageConfig,
};
use foreman_core::storage::MemoryKvStore;
use foreman_server::http::{
    build_router, close_inner, command_inner, health_inner, search_inner, version_inner,
    CloseRequest, CommandRequest, HttpState, SearchRequest,
};
use foreman_server::pipeline::Engine;

// For oneshot testing
use axum::body::Body;
use axum::http::Request;
use tower::ServiceExt;

fn test_engine() -> Arc<Engine> {
    let config = ForemanConfig {
        service: ServiceConfig {
            socket_path: "/tmp/foreman-http-test.sock".to_string(),
            log_level: "info".to_string(),
        },
        http: HttpConfig::default(),
        session: SessionConfig::default(),
        extractor: ExtractorConfig::default(),
        memory: MemoryConfig::default(),
        embedding: EmbeddingSection {
            base_url: "http://unused.invalid".to_string(),
            model: "embed-small".to_string(),
            dimensions: 4,
            max_retries: 1,
            retry_delay_ms: 10,
            api_key_env: "FOREMAN_TEST_UNSET_KEY".to_string(),
        },
        orchestrator: OrchestratorConfig {
            race_width: 2,
            provider_timeout_ms: 100,
            pipeline_deadline_ms: 2_000,
            confidence_floor: 0.5,
            providers: Vec::new(),
        },
        composer: ComposerConfig::default(),
        assets: AssetsConfig::default(),
        storage: StorageConfig::default(),
    };

    Arc::new(Engine::with_parts(
        config,
        Vec::new(),
        None,
        None,
        Arc::new(MemoryKvStore::new()),
    ))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

// ===========================================================================
// TEST 1: health — responds 200 with counters
// ===========================================================================
#[tokio::test]
async fn test_health_reports_engine_counters() {
    let engine = test_engine();

    let (status, body) = health_inner(&engine).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sessions"], 0);
    assert_eq!(body["memory_records"], 0);
}

// ===========================================================================
// TEST 2: version — static info
// ===========================================================================
#[test]
fn test_version_inner_reports_protocol() {
    let body = version_inner();
    assert!(body["version"].is_string());
    assert_eq!(body["protocol"], "foreman/1");
}

// ===========================================================================
// TEST 3: POST /command without transcript — 400
// ===========================================================================
#[tokio::test]
async fn test_command_requires_transcript() {
    let engine = test_engine();

    let (status, body) = command_inner(
        &engine,
        CommandRequest {
            transcript: None,
            session_id: None,
            confidence: None,
        },
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

// ===========================================================================
// TEST 4: POST /command via oneshot — full dispatch, corrective reply
// ===========================================================================
#[tokio::test]
async fn test_command_endpoint_corrects_invalid_navigation() {
    let engine = test_engine();
    let app = build_router(HttpState { engine });

    let req = Request::builder()
        .method("POST")
        .uri("/command")
        .header("content-type", "application/json")
        .body(Body::from(json!({"transcript": "next step"}).to_string()))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["state"], "idle");
    assert!(body["reply"]["text"].as_str().unwrap().contains("can't"));
    assert!(body["took_ms"].is_u64());
}

// ===========================================================================
// TEST 5: POST /command via oneshot — work order action payload
// ===========================================================================
#[tokio::test]
async fn test_command_endpoint_returns_structured_action() {
    let engine = test_engine();
    let app = build_router(HttpState { engine });

    let req = Request::builder()
        .method("POST")
        .uri("/command")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"transcript": "create work order for PUMP-001 high priority"}).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["reply"]["action"]["type"], "create_work_order");
    assert_eq!(body["reply"]["action"]["asset_id"], "PUMP-001");
    assert_eq!(body["reply"]["action"]["priority"], "high");
}

// ===========================================================================
// TEST 6: POST /memory/search — missing query is 400, no backend is 422
// ===========================================================================
#[tokio::test]
async fn test_search_validation_and_degradation() {
    let engine = test_engine();

    let (status, _) = search_inner(
        &engine,
        SearchRequest {
            query: None,
            limit: None,
            asset_id: None,
        },
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // No embedding backend is configured in this engine.
    let (status, body) = search_inner(
        &engine,
        SearchRequest {
            query: Some("pump".to_string()),
            limit: Some(3),
            asset_id: None,
        },
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "error");
}

// ===========================================================================
// TEST 7: POST /session/close — unknown session is 404
// ===========================================================================
#[tokio::test]
async fn test_close_unknown_session_is_not_found() {
    let engine = test_engine();

    let (status, _) = close_inner(
        &engine,
        CloseRequest {
            session_id: uuid::Uuid::new_v4(),
        },
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ===========================================================================
// TEST 8: command then close — session lifecycle over HTTP
// ===========================================================================
#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let engine = test_engine();

    let (status, body) = command_inner(
        &engine,
        CommandRequest {
            transcript: Some("start procedure valve-check".to_string()),
            session_id: None,
            confidence: None,
        },
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "in_procedure");

    let session_id: uuid::Uuid = body["session_id"].as_str().unwrap().parse().unwrap();

    let (status, body) = close_inner(&engine, CloseRequest { session_id }).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["closed"], true);
    assert_eq!(engine.sessions.len(), 0);
}
