use serde::{Deserialize, Serialize};

/// Requests accepted on the Unix socket. The HTTP API maps onto the same set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WayfinderRequest {
    Ping,
    Health,
    /// Ingest an NDJSON corpus from a path on the server host.
    Ingest {
        path: String,
    },
    /// Document-grounded question.
    Query {
        query: String,
        top_k: Option<usize>,
    },
    /// Personalized question answered from documents and the user's memory.
    Ask {
        query: String,
        user_id: String,
        top_k: Option<usize>,
    },
    /// Retrieval only, no generation. `user_id` adds that user's memory.
    Search {
        query: String,
        top_k: Option<usize>,
        user_id: Option<String>,
    },
    Insights {
        query: String,
        user_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WayfinderResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl WayfinderResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tagged_by_action() {
        let req: WayfinderRequest = serde_json::from_value(serde_json::json!({
            "action": "ask",
            "query": "where to stay?",
            "user_id": "user_001",
            "top_k": 3
        }))
        .unwrap();
        match req {
            WayfinderRequest::Ask { user_id, top_k, .. } => {
                assert_eq!(user_id, "user_001");
                assert_eq!(top_k, Some(3));
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_request_survives_messagepack() {
        let req = WayfinderRequest::Search {
            query: "tango shows".to_string(),
            top_k: None,
            user_id: Some("u1".to_string()),
        };
        let bytes = rmp_serde::to_vec_named(&req).unwrap();
        let back: WayfinderRequest = rmp_serde::from_slice(&bytes).unwrap();
        assert!(matches!(back, WayfinderRequest::Search { user_id: Some(u), .. } if u == "u1"));
    }

    #[test]
    fn test_error_response_shape() {
        let resp = WayfinderResponse::err("boom");
        assert!(!resp.is_ok());
        assert_eq!(resp.error.as_deref(), Some("boom"));
        assert!(resp.data.is_none());
    }
}
