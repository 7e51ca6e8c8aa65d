pub mod config;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod ipc;
pub mod models;
pub mod vector_service;
pub mod vertex;

pub use config::WayfinderConfig;
pub use embeddings::{
    create_backend, BackendConfig, EmbeddingBackend, EmbeddingConfig, EmbeddingError,
    GeminiEmbeddingClient, HashingEmbedder, DEFAULT_DIMENSIONS,
};
pub use error::{RagError, RagResult};
pub use generation::{
    ChatTurn, GeminiGenerationClient, GenerationConfig, GenerationError, GenerationRequest,
    Generator, Role,
};
pub use vector_service::{
    EndpointInfo, InMemoryVectorService, IndexInfo, IndexSpec, VectorService, VectorServiceError,
};
pub use vertex::{VertexConfig, VertexVectorService};
