use serde::{Deserialize, Serialize};

/// Namespaced allow-list stored with a datapoint and usable as a search filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restrict {
    pub namespace: String,
    pub allow: Vec<String>,
}

impl Restrict {
    pub fn new(namespace: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            allow: vec![value.into()],
        }
    }
}

/// What the vector service stores: identity, vector and filter tags. Never text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDatapoint {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub restricts: Vec<Restrict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub distance: f32,
    /// Restricts flattened to `namespace -> first allowed value`.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}
