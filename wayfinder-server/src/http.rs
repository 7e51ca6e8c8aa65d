//! Wayfinder HTTP API
//!
//! Axum server exposing the same operations as the Unix socket. Each endpoint
//! has a thin handler that delegates to an inner function returning
//! `(StatusCode, serde_json::Value)`, which the tests call directly.
//!
//! Endpoints:
//! - GET  /health   : readiness of both engines, index status, store sizes
//! - GET  /version  : server version info
//! - POST /query    : document-grounded answer
//! - POST /ask      : personalized answer (503 until both engines are ready)
//! - POST /search   : retrieval only, documents plus optional user memory
//! - POST /ingest   : ingest an NDJSON corpus from a server-side path
//! - POST /insights : how an answer for this user would be personalized

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use wayfinder_core::ipc::{WayfinderRequest, WayfinderResponse};

use crate::router;
use crate::state::AppState;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub app: Arc<AppState>,
}

pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/query", post(query_handler))
        .route("/ask", post(ask_handler))
        .route("/search", post(search_handler))
        .route("/ingest", post(ingest_handler))
        .route("/insights", post(insights_handler))
        .with_state(state)
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(app: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = format!("{}:{}", app.config.http.host, app.config.http.port);
    let state = Arc::new(HttpState { app });

    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Wayfinder HTTP API listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct QueryRequest {
    pub query: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AskRequest {
    pub query: Option<String>,
    pub user_id: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub top_k: Option<usize>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct IngestRequest {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct InsightsRequest {
    pub query: Option<String>,
    pub user_id: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }

    fn body(msg: impl Into<String>) -> serde_json::Value {
        serde_json::to_value(Self::new(msg)).unwrap_or_else(|_| serde_json::json!({}))
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn health_inner(app: &AppState) -> (StatusCode, serde_json::Value) {
    let mut body = router::health_snapshot(app).await;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("version".to_string(), serde_json::json!(env!("CARGO_PKG_VERSION")));
        obj.insert(
            "socket".to_string(),
            serde_json::json!(app.config.service.socket_path),
        );
    }
    let status = if app.composer.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, body)
}

pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "wayfinder/1",
    })
}

pub async fn query_inner(app: &AppState, req: QueryRequest) -> (StatusCode, serde_json::Value) {
    let Some(query) = non_empty(req.query) else {
        return (StatusCode::BAD_REQUEST, ErrorResponse::body("query field is required"));
    };
    let response = router::handle_request(
        WayfinderRequest::Query {
            query,
            top_k: req.top_k,
        },
        app,
    )
    .await;
    into_http(response)
}

pub async fn ask_inner(app: &AppState, req: AskRequest) -> (StatusCode, serde_json::Value) {
    let Some(query) = non_empty(req.query) else {
        return (StatusCode::BAD_REQUEST, ErrorResponse::body("query field is required"));
    };
    let Some(user_id) = non_empty(req.user_id) else {
        return (StatusCode::BAD_REQUEST, ErrorResponse::body("user_id field is required"));
    };

    if !app.composer.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "error": "retrieval engines are not ready",
                "status": "error",
                "documents": app.documents.is_ready(),
                "memory": app.composer.memory().is_ready(),
            }),
        );
    }

    let response = router::handle_request(
        WayfinderRequest::Ask {
            query,
            user_id,
            top_k: req.top_k,
        },
        app,
    )
    .await;
    into_http(response)
}

pub async fn search_inner(app: &AppState, req: SearchRequest) -> (StatusCode, serde_json::Value) {
    let Some(query) = non_empty(req.query) else {
        return (StatusCode::BAD_REQUEST, ErrorResponse::body("query field is required"));
    };

    let start = Instant::now();
    let response = router::handle_request(
        WayfinderRequest::Search {
            query,
            top_k: req.top_k,
            user_id: non_empty(req.user_id),
        },
        app,
    )
    .await;
    let took_ms = start.elapsed().as_millis() as u64;

    let (status, mut body) = into_http(response);
    if status == StatusCode::OK {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("took_ms".to_string(), serde_json::json!(took_ms));
        }
    }
    (status, body)
}

pub async fn ingest_inner(app: &AppState, req: IngestRequest) -> (StatusCode, serde_json::Value) {
    let Some(path) = non_empty(req.path) else {
        return (StatusCode::BAD_REQUEST, ErrorResponse::body("path field is required"));
    };
    into_http(router::handle_request(WayfinderRequest::Ingest { path }, app).await)
}

pub async fn insights_inner(app: &AppState, req: InsightsRequest) -> (StatusCode, serde_json::Value) {
    let Some(user_id) = non_empty(req.user_id) else {
        return (StatusCode::BAD_REQUEST, ErrorResponse::body("user_id field is required"));
    };
    let query = req.query.unwrap_or_default();
    into_http(router::handle_request(WayfinderRequest::Insights { query, user_id }, app).await)
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.app).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn query_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<QueryRequest>,
) -> impl IntoResponse {
    let (status, body) = query_inner(&state.app, req).await;
    (status, Json(body))
}

pub async fn ask_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<AskRequest>,
) -> impl IntoResponse {
    let (status, body) = ask_inner(&state.app, req).await;
    (status, Json(body))
}

pub async fn search_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SearchRequest>,
) -> impl IntoResponse {
    let (status, body) = search_inner(&state.app, req).await;
    (status, Json(body))
}

pub async fn ingest_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<IngestRequest>,
) -> impl IntoResponse {
    let (status, body) = ingest_inner(&state.app, req).await;
    (status, Json(body))
}

pub async fn insights_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<InsightsRequest>,
) -> impl IntoResponse {
    let (status, body) = insights_inner(&state.app, req).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Convert an IPC `WayfinderResponse` into an HTTP body value, or an error string.
pub fn response_to_http(response: WayfinderResponse) -> std::result::Result<serde_json::Value, String> {
    if response.is_ok() {
        Ok(response.data.unwrap_or(serde_json::json!({})))
    } else {
        Err(response.error.unwrap_or_else(|| "unknown error".to_string()))
    }
}

fn into_http(response: WayfinderResponse) -> (StatusCode, serde_json::Value) {
    match response_to_http(response) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::body(e)),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string());
        assert_eq!(v["protocol"], "wayfinder/1");
    }

    #[test]
    fn test_response_to_http_ok() {
        let resp = WayfinderResponse::ok(serde_json::json!({"hits": [], "count": 0}));
        let data = response_to_http(resp).unwrap();
        assert_eq!(data["count"], 0);
    }

    #[test]
    fn test_response_to_http_error() {
        let resp = WayfinderResponse::err("something went wrong");
        assert_eq!(response_to_http(resp).unwrap_err(), "something went wrong");
    }

    #[test]
    fn test_response_to_http_error_no_message() {
        let mut resp = WayfinderResponse::err("x");
        resp.error = None;
        assert_eq!(response_to_http(resp).unwrap_err(), "unknown error");
    }

    #[test]
    fn test_non_empty_rejects_blank() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some("q".to_string())), Some("q".to_string()));
    }

    #[test]
    fn test_into_http_maps_errors_to_500() {
        let (status, body) = into_http(WayfinderResponse::err("boom"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "boom");
        assert_eq!(body["status"], "error");
    }
}
