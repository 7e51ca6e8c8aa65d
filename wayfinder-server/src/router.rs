use std::path::PathBuf;

use wayfinder_core::config::expand_path;
use wayfinder_core::ipc::{WayfinderRequest, WayfinderResponse};

use crate::state::AppState;
use crate::subsystems::dispatch::RetrievalRequest;
use crate::subsystems::engine::Corpus;

/// Shared by the IPC server and the HTTP handlers.
pub async fn handle_request(request: WayfinderRequest, state: &AppState) -> WayfinderResponse {
    match request {
        WayfinderRequest::Ping => WayfinderResponse::pong(),
        WayfinderRequest::Health => WayfinderResponse::ok(health_snapshot(state).await),
        WayfinderRequest::Ingest { path } => {
            let path = PathBuf::from(expand_path(&path));
            match state
                .dispatcher
                .ingest(state.documents.name(), Corpus::Ndjson(path))
                .await
            {
                Ok(report) => to_response(&report),
                Err(e) => WayfinderResponse::err(e.to_string()),
            }
        }
        WayfinderRequest::Query { query, top_k } => {
            if query.trim().is_empty() {
                return WayfinderResponse::err("query must not be empty");
            }
            let result = state.documents.query(&query, top_k.unwrap_or(0)).await;
            to_response(&result)
        }
        WayfinderRequest::Ask {
            query,
            user_id,
            top_k,
        } => {
            if query.trim().is_empty() {
                return WayfinderResponse::err("query must not be empty");
            }
            match state
                .composer
                .query_with_memory(&query, &user_id, top_k.unwrap_or(0))
                .await
            {
                Ok(result) => to_response(&result),
                Err(e) => WayfinderResponse::err(e.to_string()),
            }
        }
        WayfinderRequest::Search {
            query,
            top_k,
            user_id,
        } => {
            let request = RetrievalRequest {
                query,
                top_k: top_k.unwrap_or(state.config.retrieval.default_top_k),
                user_id,
            };
            let result = state.dispatcher.retrieve(&request).await;
            to_response(&result)
        }
        WayfinderRequest::Insights { query, user_id } => {
            match state.composer.personalization_insights(&user_id, &query).await {
                Ok(insights) => to_response(&insights),
                Err(e) => WayfinderResponse::err(e.to_string()),
            }
        }
    }
}

pub async fn health_snapshot(state: &AppState) -> serde_json::Value {
    let documents = &state.documents;
    let memory = state.composer.memory();
    serde_json::json!({
        "status": if state.composer.is_ready() { "ready" } else { "degraded" },
        "documents": {
            "ready": documents.is_ready(),
            "index": documents.index_status(),
            "chunks": documents.store().len().await,
        },
        "memory": {
            "ready": memory.is_ready(),
            "index": memory.index_status(),
            "chunks": memory.store().len().await,
            "users": state.composer.user_count().await,
        },
        "embedding": documents.index().embedder().name(),
        "retrievers": state.dispatcher.names(),
    })
}

fn to_response<T: serde::Serialize>(value: &T) -> WayfinderResponse {
    match serde_json::to_value(value) {
        Ok(data) => WayfinderResponse::ok(data),
        Err(e) => WayfinderResponse::err(format!("Serialization error: {}", e)),
    }
}
