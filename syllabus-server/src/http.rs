//! Syllabus HTTP REST API
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`. The inner functions go through
//! the request router, so the HTTP surface and the router share one dispatch.
//!
//! Endpoints:
//! - POST /api/query          - answer a question about the courses
//! - GET  /api/courses        - course count and titles
//! - POST /api/ingest         - ingest a folder under the docs folder
//! - POST /api/session/clear  - drop a session, return a fresh id
//! - GET  /                   - service banner
//! - GET  /health             - vector store status
//! - GET  /version            - server version info

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use syllabus_core::protocol::{SyllabusRequest, SyllabusResponse};
use syllabus_core::SyllabusConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::router::{handle_request, PATH_OUTSIDE_DOCS};
use crate::subsystems::answer::RagSystem;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub rag: Arc<RagSystem>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/query", post(query_handler))
        .route("/api/courses", get(courses_handler))
        .route("/api/ingest", post(ingest_handler))
        .route("/api/session/clear", post(clear_session_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    rag: Arc<RagSystem>,
    config: &SyllabusConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { rag });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Syllabus HTTP API listening on http://{}", addr);

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
pub struct QueryRequest {
    pub query: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct IngestRequest {
    pub path: Option<String>,
    #[serde(default)]
    pub clear_existing: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct ClearSessionParams {
    pub session_id: Option<String>,
}

fn error_body(msg: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "error": msg.into(),
        "status": "error",
    })
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub fn root_inner() -> serde_json::Value {
    serde_json::json!({
        "message": "Course Materials RAG System",
        "version": env!("CARGO_PKG_VERSION"),
    })
}

pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "syllabus/1",
    })
}

pub async fn health_inner(rag: &RagSystem) -> (StatusCode, serde_json::Value) {
    match response_to_http(handle_request(SyllabusRequest::Health, rag).await) {
        Ok(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("version".to_string(), serde_json::json!(env!("CARGO_PKG_VERSION")));
            }
            (StatusCode::OK, data)
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e,
            }),
        ),
    }
}

/// Validates the query and runs it through the router.
pub async fn query_inner(rag: &RagSystem, req: QueryRequest) -> (StatusCode, serde_json::Value) {
    if req.query.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, error_body("query must not be empty"));
    }

    let request = SyllabusRequest::Ask {
        query: req.query,
        session_id: req.session_id.filter(|s| !s.trim().is_empty()),
    };

    match response_to_http(handle_request(request, rag).await) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e)),
    }
}

pub async fn courses_inner(rag: &RagSystem) -> (StatusCode, serde_json::Value) {
    match response_to_http(handle_request(SyllabusRequest::Courses, rag).await) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e)),
    }
}

pub async fn ingest_inner(rag: &RagSystem, req: IngestRequest) -> (StatusCode, serde_json::Value) {
    let request = SyllabusRequest::Ingest {
        path: req.path,
        clear_existing: req.clear_existing,
    };

    match response_to_http(handle_request(request, rag).await) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) if e == PATH_OUTSIDE_DOCS => (StatusCode::BAD_REQUEST, error_body(e)),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e)),
    }
}

pub async fn clear_session_inner(
    rag: &RagSystem,
    params: ClearSessionParams,
) -> (StatusCode, serde_json::Value) {
    let request = SyllabusRequest::ClearSession {
        session_id: params.session_id,
    };

    match response_to_http(handle_request(request, rag).await) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e)),
    }
}

// ============================================================================
// Axum handler wrappers (thin - delegate to inner functions)
// ============================================================================

pub async fn root_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(root_inner()))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.rag).await;
    (status, Json(body))
}

pub async fn query_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<QueryRequest>,
) -> impl IntoResponse {
    let (status, body) = query_inner(&state.rag, req).await;
    (status, Json(body))
}

pub async fn courses_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = courses_inner(&state.rag).await;
    (status, Json(body))
}

pub async fn ingest_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<IngestRequest>,
) -> impl IntoResponse {
    let (status, body) = ingest_inner(&state.rag, req).await;
    (status, Json(body))
}

pub async fn clear_session_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<ClearSessionParams>,
) -> impl IntoResponse {
    let (status, body) = clear_session_inner(&state.rag, params).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Convert a `SyllabusResponse` into an HTTP body value, or an error string.
pub fn response_to_http(response: SyllabusResponse) -> std::result::Result<serde_json::Value, String> {
    if response.is_ok() {
        Ok(response.data.unwrap_or(serde_json::json!({})))
    } else {
        Err(response.error.unwrap_or_else(|| "unknown error".to_string()))
    }
}
