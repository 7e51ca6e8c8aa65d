use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flat JSON object carried alongside a chunk.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A bounded text fragment ready for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(chunk_id: impl Into<String>, text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            text: text.into(),
            metadata,
        }
    }

    /// String value of a metadata field, if present.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn into_record(self) -> (String, ChunkRecord) {
        (
            self.chunk_id,
            ChunkRecord {
                text: self.text,
                metadata: self.metadata,
                ingested_at: Utc::now(),
            },
        )
    }
}

/// Authoritative text and metadata for an indexed chunk id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    pub metadata: Metadata,
    pub ingested_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}
