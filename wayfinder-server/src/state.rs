//! Composition of the two engines, the composer and the dispatcher.
//!
//! Built once at startup and shared by the IPC and HTTP surfaces.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use wayfinder_core::config::{expand_path, IndexConfig};
use wayfinder_core::embeddings::{create_backend, BackendConfig};
use wayfinder_core::{
    EmbeddingBackend, GeminiGenerationClient, GenerationConfig, Generator, InMemoryVectorService,
    RagResult, VectorService, VertexConfig, VertexVectorService, WayfinderConfig,
};
use wayfinder_ingest::DocumentProcessor;

use crate::subsystems::chunk_store::ChunkStore;
use crate::subsystems::composer::MemoryComposer;
use crate::subsystems::dispatch::{Dispatcher, Retriever, UserMemoryRetriever};
use crate::subsystems::engine::{Corpus, RetrievalEngine};
use crate::subsystems::vector_index::VectorIndex;

/// Restrict namespaces written with document datapoints.
const DOCUMENT_RESTRICTS: &[&str] = &["source_id"];
/// Restrict namespaces written with memory datapoints.
const MEMORY_RESTRICTS: &[&str] = &["user_id", "type"];

pub struct AppState {
    pub config: WayfinderConfig,
    pub documents: Arc<RetrievalEngine>,
    pub composer: Arc<MemoryComposer>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Wire engines from already-built collaborators.
    pub fn assemble(
        config: WayfinderConfig,
        embedder: Arc<dyn EmbeddingBackend>,
        documents_service: Arc<dyn VectorService>,
        memory_service: Arc<dyn VectorService>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let documents = Arc::new(RetrievalEngine::new(
            "documents",
            Arc::new(VectorIndex::new(
                documents_service,
                embedder.clone(),
                config.documents_index.clone(),
            )),
            Arc::new(ChunkStore::new()),
            DocumentProcessor::new(embedder.clone(), config.chunking.clone())
                .with_restrict_keys(DOCUMENT_RESTRICTS),
            generator.clone(),
            config.retrieval.clone(),
        ));

        let memory = Arc::new(RetrievalEngine::new(
            "memory",
            Arc::new(VectorIndex::new(
                memory_service,
                embedder.clone(),
                config.memory_index.clone(),
            )),
            Arc::new(ChunkStore::new()),
            DocumentProcessor::new(embedder, config.chunking.clone())
                .with_restrict_keys(MEMORY_RESTRICTS),
            generator.clone(),
            config.retrieval.clone(),
        ));

        let composer = Arc::new(MemoryComposer::new(
            documents.clone(),
            memory,
            generator,
            config.memory.clone(),
            Duration::from_secs(config.retrieval.call_timeout_seconds.max(1)),
        ));

        let dispatcher = Dispatcher::new(vec![
            documents.clone() as Arc<dyn Retriever>,
            Arc::new(UserMemoryRetriever::new(composer.clone())),
        ]);

        Self {
            config,
            documents,
            composer,
            dispatcher,
        }
    }

    /// Build every collaborator named in `config`.
    pub fn from_config(config: WayfinderConfig) -> Result<Self> {
        let backend_config = BackendConfig::from_settings(&config.embedding)?;
        let embedder: Arc<dyn EmbeddingBackend> = Arc::from(create_backend(backend_config)?);
        tracing::info!(
            backend = embedder.name(),
            dimensions = embedder.dimensions(),
            "Embedding backend ready"
        );

        // Both indexes share one in-memory service when neither is on Vertex.
        let local: Arc<dyn VectorService> = Arc::new(InMemoryVectorService::new());
        let documents_service = vector_service(&config, &config.documents_index, &local)?;
        let memory_service = vector_service(&config, &config.memory_index, &local)?;

        let generator: Arc<dyn Generator> = Arc::new(
            GeminiGenerationClient::new(GenerationConfig::from_settings(&config.generation))
                .context("failed to create generation client")?,
        );

        Ok(Self::assemble(
            config,
            embedder,
            documents_service,
            memory_service,
            generator,
        ))
    }

    /// Bring up both indexes. Any failure is fatal at startup.
    pub async fn initialize(&self) -> RagResult<()> {
        self.documents.index().initialize().await?;
        self.composer.memory().index().initialize().await?;
        Ok(())
    }

    /// Ingest the configured corpus and user memory, if any.
    pub async fn load_configured_data(&self) -> Result<()> {
        if let Some(path) = &self.config.data.corpus_path {
            let path = expand_path(path);
            let report = self
                .documents
                .ingest(Corpus::Ndjson(path.clone().into()))
                .await
                .with_context(|| format!("failed to ingest corpus {}", path))?;
            tracing::info!(
                path = %path,
                chunks = report.chunks_stored,
                upserted = report.datapoints_upserted,
                "Corpus loaded"
            );
        }

        if let Some(profiles) = &self.config.memory.profiles_path {
            let profiles = expand_path(profiles);
            let histories = self.config.memory.chat_histories_path.as_deref().map(expand_path);
            let report = self
                .composer
                .load_memory(Path::new(&profiles), histories.as_deref().map(Path::new))
                .await
                .with_context(|| format!("failed to load user memory from {}", profiles))?;
            tracing::info!(
                chunks = report.chunks_stored,
                upserted = report.datapoints_upserted,
                "User memory loaded"
            );
        }

        Ok(())
    }
}

fn vector_service(
    config: &WayfinderConfig,
    index: &IndexConfig,
    local: &Arc<dyn VectorService>,
) -> Result<Arc<dyn VectorService>> {
    match index.backend.as_str() {
        "memory" => Ok(local.clone()),
        "vertex" => {
            let vertex = VertexConfig::from_settings(
                &config.gcp,
                index,
                config.retrieval.call_timeout_seconds,
            );
            Ok(Arc::new(VertexVectorService::new(vertex).with_context(|| {
                format!("failed to create Vertex client for {}", index.index_display_name)
            })?))
        }
        other => anyhow::bail!("unknown vector index backend: {}", other),
    }
}
