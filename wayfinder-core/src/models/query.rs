use serde::{Deserialize, Serialize};

use super::chunk::Metadata;
use super::vector::SearchHit;

/// A search hit joined with its stored text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub distance: f32,
    pub text: String,
    pub metadata: Metadata,
    /// False when the chunk store had no entry and `text` is a placeholder.
    pub rehydrated: bool,
}

impl RetrievedChunk {
    pub fn from_hit(hit: SearchHit, text: String, metadata: Metadata, rehydrated: bool) -> Self {
        Self {
            id: hit.id,
            distance: hit.distance,
            text,
            metadata,
            rehydrated,
        }
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPath {
    Grounded,
    RagMiss,
}

/// Why a served result is weaker than a fully grounded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    EmbeddingFailed { reason: String },
    SearchFailed { reason: String },
    SearchTimedOut,
    MissingChunkText { chunk_id: String },
    GenerationFailed { reason: String },
    GenerationTimedOut,
    EmptyGeneration,
    NoUserContext,
    NoProfile,
    NoDocumentContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub response_text: String,
    pub hits: Vec<RetrievedChunk>,
    pub context: String,
    pub augmented_prompt: String,
    pub path: QueryPath,
    #[serde(default)]
    pub degradations: Vec<Degradation>,
}
