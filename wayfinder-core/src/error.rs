use thiserror::Error;

use crate::embeddings::EmbeddingError;
use crate::generation::GenerationError;
use crate::vector_service::VectorServiceError;

#[derive(Error, Debug)]
pub enum RagError {
    /// Malformed input record. Callers skip it and continue.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Index, endpoint or deployment bring-up failed.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Not ready (documents ready: {documents}, memory ready: {memory})")]
    NotReady { documents: bool, memory: bool },

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// Bring-up failures from the vector service are infrastructure errors,
    /// everything else it raises at query time is a search error.
    pub fn infrastructure(e: VectorServiceError) -> Self {
        RagError::Infrastructure(e.to_string())
    }

    pub fn search(e: VectorServiceError) -> Self {
        RagError::Search(e.to_string())
    }
}

pub type RagResult<T> = Result<T, RagError>;
