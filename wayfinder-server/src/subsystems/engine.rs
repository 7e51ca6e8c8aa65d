//! RetrievalEngine: one index, its chunk store and the query pipeline on top.
//!
//! Ingestion: chunk -> embed -> record -> upsert.
//! Query: embed -> search -> rehydrate -> assemble context -> generate.
//!
//! `query` never fails. Search problems fall back to the RAG-miss path and
//! generation problems to fixed strings, with the reason recorded as a
//! [`Degradation`] on the result.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use wayfinder_core::config::RetrievalConfig;
use wayfinder_core::models::{
    Chunk, Degradation, QueryPath, QueryResult, Restrict, RetrievedChunk,
};
use wayfinder_core::{GenerationRequest, Generator, RagError, RagResult};
use wayfinder_ingest::{CorpusReport, DocumentProcessor, ProcessedCorpus};

use super::chunk_store::ChunkStore;
use super::vector_index::{IndexStatus, SearchInput, VectorIndex};
use crate::prompt;

const CONTEXT_SEPARATOR: &str = "\n---\n";

/// What to ingest.
#[derive(Debug, Clone)]
pub enum Corpus {
    /// NDJSON file, one document per line.
    Ndjson(PathBuf),
    /// Chunks built elsewhere (memory chunks, tests).
    Prepared(Vec<Chunk>),
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    pub chunks_stored: usize,
    pub datapoints_upserted: usize,
    pub failed_embeddings: usize,
    /// Present for NDJSON ingests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus: Option<CorpusReport>,
}

/// Search + rehydration outcome, before any context string is built.
#[derive(Debug, Default, Clone)]
pub struct Retrieval {
    pub hits: Vec<RetrievedChunk>,
    pub degradations: Vec<Degradation>,
}

#[derive(Debug, Default, Clone)]
pub struct RetrievedContext {
    pub hits: Vec<RetrievedChunk>,
    pub context: String,
    pub degradations: Vec<Degradation>,
}

pub struct RetrievalEngine {
    name: String,
    index: Arc<VectorIndex>,
    store: Arc<ChunkStore>,
    processor: DocumentProcessor,
    generator: Arc<dyn Generator>,
    config: RetrievalConfig,
    loaded: AtomicBool,
}

impl RetrievalEngine {
    pub fn new(
        name: impl Into<String>,
        index: Arc<VectorIndex>,
        store: Arc<ChunkStore>,
        processor: DocumentProcessor,
        generator: Arc<dyn Generator>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            name: name.into(),
            index,
            store,
            processor,
            generator,
            config,
            loaded: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn index_status(&self) -> IndexStatus {
        self.index.status()
    }

    /// Index is up and at least one datapoint has been persisted.
    pub fn is_ready(&self) -> bool {
        self.index.is_ready() && self.loaded.load(Ordering::Acquire)
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.call_timeout_seconds.max(1))
    }

    fn effective_top_k(&self, top_k: usize) -> usize {
        if top_k == 0 {
            self.config.default_top_k
        } else {
            top_k
        }
    }

    // ========================================================================
    // INGEST
    // ========================================================================

    pub async fn ingest(&self, corpus: Corpus) -> RagResult<IngestReport> {
        self.index.initialize().await?;

        let processed = match corpus {
            Corpus::Ndjson(path) => {
                tracing::info!(engine = %self.name, path = %path.display(), "Ingesting NDJSON corpus");
                self.processor.process_corpus(&path).await?
            }
            Corpus::Prepared(chunks) => {
                tracing::info!(engine = %self.name, chunks = chunks.len(), "Ingesting prepared chunks");
                let doc = self.processor.process_prepared(chunks).await;
                ProcessedCorpus {
                    report: CorpusReport {
                        chunks_produced: doc.chunks.len() + doc.failed_embeddings,
                        chunks_embedded: doc.chunks.len(),
                        failed_embeddings: doc.failed_embeddings,
                        ..Default::default()
                    },
                    datapoints: doc.datapoints,
                    chunks: doc.chunks,
                }
            }
        };

        let ProcessedCorpus {
            datapoints,
            chunks,
            report,
        } = processed;
        let failed_embeddings = report.failed_embeddings;
        let corpus_report = (report.documents > 0 || report.malformed_lines > 0).then_some(report);

        if datapoints.is_empty() {
            tracing::warn!(engine = %self.name, "Nothing to index after processing");
            return Ok(IngestReport {
                failed_embeddings,
                corpus: corpus_report,
                ..Default::default()
            });
        }

        let chunks_stored = self.store.put_many(chunks).await;

        let batch_size = self.config.upsert_batch_size.max(1);
        let mut upserted = 0;
        for batch in datapoints.chunks(batch_size) {
            let accepted = self.index.upsert(batch).await?;
            upserted += accepted.len();
            if !accepted.is_empty() {
                self.loaded.store(true, Ordering::Release);
            }
        }

        tracing::info!(
            engine = %self.name,
            chunks = chunks_stored,
            upserted,
            failed_embeddings,
            "Ingest complete"
        );

        Ok(IngestReport {
            chunks_stored,
            datapoints_upserted: upserted,
            failed_embeddings,
            corpus: corpus_report,
        })
    }

    // ========================================================================
    // RETRIEVE
    // ========================================================================

    /// Search and rehydrate. Never fails; problems come back as degradations.
    pub async fn retrieve(&self, query: &str, top_k: usize, restricts: &[Restrict]) -> Retrieval {
        let top_k = self.effective_top_k(top_k);
        let mut degradations = Vec::new();

        let search = self.index.search(SearchInput::Text(query), top_k, restricts);
        let hits = match tokio::time::timeout(self.call_timeout(), search).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(RagError::Embedding(e))) => {
                tracing::warn!(engine = %self.name, error = %e, "Query embedding failed");
                degradations.push(Degradation::EmbeddingFailed {
                    reason: e.to_string(),
                });
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::warn!(engine = %self.name, error = %e, "Search failed");
                degradations.push(Degradation::SearchFailed {
                    reason: e.to_string(),
                });
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(engine = %self.name, "Search timed out");
                degradations.push(Degradation::SearchTimedOut);
                Vec::new()
            }
        };

        let mut rehydrated = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get(&hit.id).await {
                Some(record) => {
                    let text = record.text.clone();
                    let metadata = record.metadata.clone();
                    rehydrated.push(RetrievedChunk::from_hit(hit, text, metadata, true));
                }
                None => {
                    tracing::warn!(engine = %self.name, chunk_id = %hit.id, "No stored text for indexed chunk");
                    degradations.push(Degradation::MissingChunkText {
                        chunk_id: hit.id.clone(),
                    });
                    let metadata = hit.metadata.clone();
                    rehydrated.push(RetrievedChunk::from_hit(
                        hit,
                        prompt::MISSING_CHUNK_TEXT.to_string(),
                        metadata,
                        false,
                    ));
                }
            }
        }

        Retrieval {
            hits: rehydrated,
            degradations,
        }
    }

    pub async fn retrieve_context(
        &self,
        query: &str,
        top_k: usize,
        restricts: &[Restrict],
    ) -> RetrievedContext {
        let Retrieval { hits, degradations } = self.retrieve(query, top_k, restricts).await;
        let context = self.build_context(&hits);
        RetrievedContext {
            hits,
            context,
            degradations,
        }
    }

    /// Context from rehydrated hits only; placeholders never count as context.
    pub fn build_context(&self, hits: &[RetrievedChunk]) -> String {
        hits.iter()
            .filter(|hit| hit.rehydrated)
            .map(|hit| match hit.meta_str(&self.config.provenance_field) {
                Some(value) if !value.is_empty() => format!(
                    "From {} '{}' (chunk: {}):\n{}",
                    self.config.provenance_label, value, hit.id, hit.text
                ),
                _ => format!("Source chunk: {}:\n{}", hit.id, hit.text),
            })
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }

    // ========================================================================
    // QUERY
    // ========================================================================

    pub async fn query(&self, text: &str, top_k: usize) -> QueryResult {
        let RetrievedContext {
            hits,
            context,
            mut degradations,
        } = self.retrieve_context(text, top_k, &[]).await;

        let (path, augmented_prompt) = if context.trim().is_empty() {
            (QueryPath::RagMiss, text.to_string())
        } else {
            (QueryPath::Grounded, prompt::document_prompt(&context, text))
        };

        let empty_fallback = match path {
            QueryPath::Grounded => prompt::EMPTY_GROUNDED_FALLBACK,
            QueryPath::RagMiss => prompt::RAG_MISS_FALLBACK,
        };

        let response_text = generate_bounded(
            self.generator.as_ref(),
            GenerationRequest::prompt(augmented_prompt.clone()),
            self.call_timeout(),
            prompt::GENERATION_APOLOGY,
            empty_fallback,
            &mut degradations,
        )
        .await;

        tracing::info!(
            engine = %self.name,
            hits = hits.len(),
            path = ?path,
            degradations = degradations.len(),
            "Query served"
        );

        QueryResult {
            response_text,
            hits,
            context,
            augmented_prompt,
            path,
            degradations,
        }
    }
}

/// Run one generation call under `limit`.
///
/// Errors and timeouts yield `apology`, a blank answer yields `empty_fallback`.
/// The returned text is never empty.
pub(crate) async fn generate_bounded(
    generator: &dyn Generator,
    request: GenerationRequest,
    limit: Duration,
    apology: &str,
    empty_fallback: &str,
    degradations: &mut Vec<Degradation>,
) -> String {
    match tokio::time::timeout(limit, generator.generate(request)).await {
        Ok(Ok(text)) if !text.trim().is_empty() => text,
        Ok(Ok(_)) => {
            tracing::warn!(generator = generator.name(), "Generation returned no text");
            degradations.push(Degradation::EmptyGeneration);
            empty_fallback.to_string()
        }
        Ok(Err(e)) => {
            tracing::error!(generator = generator.name(), error = %e, "Generation failed");
            degradations.push(Degradation::GenerationFailed {
                reason: e.to_string(),
            });
            apology.to_string()
        }
        Err(_) => {
            tracing::error!(generator = generator.name(), "Generation timed out");
            degradations.push(Degradation::GenerationTimedOut);
            apology.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use wayfinder_core::config::{ChunkingConfig, IndexConfig};
    use wayfinder_core::models::Metadata;
    use wayfinder_core::vector_service::FailPoint;
    use wayfinder_core::models::IndexDatapoint;
    use wayfinder_core::{
        EmbeddingBackend, GenerationError, HashingEmbedder, InMemoryVectorService, VectorService,
    };

    struct Echo;

    #[async_trait]
    impl Generator for Echo {
        async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
            Ok(format!("echo: {}", request.prompt.len()))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct Blank;

    #[async_trait]
    impl Generator for Blank {
        async fn generate(&self, _: GenerationRequest) -> Result<String, GenerationError> {
            Ok("   ".to_string())
        }

        fn name(&self) -> &str {
            "blank"
        }
    }

    struct Broken;

    #[async_trait]
    impl Generator for Broken {
        async fn generate(&self, _: GenerationRequest) -> Result<String, GenerationError> {
            Err(GenerationError::Blocked("SAFETY".to_string()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn engine_with(
        service: Arc<InMemoryVectorService>,
        generator: Arc<dyn Generator>,
    ) -> RetrievalEngine {
        let embedder = Arc::new(HashingEmbedder::new(64));
        let index = Arc::new(VectorIndex::new(service, embedder.clone(), IndexConfig::documents()));
        RetrievalEngine::new(
            "documents",
            index,
            Arc::new(ChunkStore::new()),
            DocumentProcessor::new(embedder, ChunkingConfig::default()),
            generator,
            RetrievalConfig::default(),
        )
    }

    fn hotel_chunk(id: &str, name: &str, text: &str) -> Chunk {
        let mut meta = Metadata::new();
        meta.insert("hotel_name".to_string(), json!(name));
        Chunk::new(id, text, meta)
    }

    #[tokio::test]
    async fn test_not_ready_until_something_is_upserted() {
        let engine = engine_with(Arc::new(InMemoryVectorService::new()), Arc::new(Echo));
        assert!(!engine.is_ready());

        let report = engine.ingest(Corpus::Prepared(vec![])).await.unwrap();
        assert_eq!(report.datapoints_upserted, 0);
        assert!(!engine.is_ready());
        assert_eq!(engine.index_status(), IndexStatus::Ready);

        engine
            .ingest(Corpus::Prepared(vec![hotel_chunk("a_chunk_0", "Alvear", "Palace hotel in Recoleta")]))
            .await
            .unwrap();
        assert!(engine.is_ready());
    }

    #[tokio::test]
    async fn test_grounded_query_formats_provenance() {
        let engine = engine_with(Arc::new(InMemoryVectorService::new()), Arc::new(Echo));
        engine
            .ingest(Corpus::Prepared(vec![
                hotel_chunk("alvear_chunk_0", "Alvear Palace", "Palace hotel in Recoleta"),
                Chunk::new("plain_chunk_0", "Street food guide", Metadata::new()),
            ]))
            .await
            .unwrap();

        let result = engine.query("Palace hotel in Recoleta", 2).await;
        assert_eq!(result.path, QueryPath::Grounded);
        assert_eq!(result.hits[0].id, "alvear_chunk_0");
        assert!(result
            .context
            .starts_with("From hotel 'Alvear Palace' (chunk: alvear_chunk_0):\nPalace hotel in Recoleta"));
        assert!(result.context.contains("\n---\nSource chunk: plain_chunk_0:\nStreet food guide"));
        assert!(result.augmented_prompt.contains(&result.context));
        assert!(result.response_text.starts_with("echo:"));
    }

    #[tokio::test]
    async fn test_search_failure_degrades_to_rag_miss() {
        let service = Arc::new(InMemoryVectorService::new());
        let engine = engine_with(service.clone(), Arc::new(Echo));
        engine
            .ingest(Corpus::Prepared(vec![hotel_chunk("a_chunk_0", "A", "text")]))
            .await
            .unwrap();
        service.fail(FailPoint::FindNeighbors).await;

        let result = engine.query("where to eat", 3).await;
        assert_eq!(result.path, QueryPath::RagMiss);
        assert_eq!(result.augmented_prompt, "where to eat");
        assert!(result.hits.is_empty());
        assert!(matches!(result.degradations[0], Degradation::SearchFailed { .. }));
        assert!(!result.response_text.is_empty());
    }

    #[tokio::test]
    async fn test_missing_store_entry_gets_placeholder() {
        let service = Arc::new(InMemoryVectorService::new());
        let engine = engine_with(service, Arc::new(Echo));
        let vector = HashingEmbedder::new(64).embed("orphan vector").await.unwrap();
        engine
            .index()
            .upsert(&[IndexDatapoint {
                id: "orphan".to_string(),
                vector,
                restricts: vec![],
            }])
            .await
            .unwrap();

        let result = engine.retrieve_context("orphan vector", 1, &[]).await;
        assert_eq!(result.hits[0].text, prompt::MISSING_CHUNK_TEXT);
        assert!(!result.hits[0].rehydrated);
        assert_eq!(
            result.degradations,
            vec![Degradation::MissingChunkText {
                chunk_id: "orphan".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_only_unrehydratable_hits_is_a_rag_miss() {
        let engine = engine_with(Arc::new(InMemoryVectorService::new()), Arc::new(Echo));
        let vector = HashingEmbedder::new(64).embed("orphan vector").await.unwrap();
        engine
            .index()
            .upsert(&[IndexDatapoint {
                id: "orphan".to_string(),
                vector,
                restricts: vec![],
            }])
            .await
            .unwrap();

        let result = engine.query("orphan vector", 1).await;
        assert_eq!(result.path, QueryPath::RagMiss);
        assert_eq!(result.augmented_prompt, "orphan vector");
        assert!(result.context.is_empty());
        assert_eq!(result.hits.len(), 1);
        assert!(!result.hits[0].rehydrated);
        assert!(result.degradations.contains(&Degradation::MissingChunkText {
            chunk_id: "orphan".to_string()
        }));
        assert!(!result.response_text.is_empty());
    }

    #[tokio::test]
    async fn test_empty_and_failed_generation_fallbacks() {
        let service = Arc::new(InMemoryVectorService::new());
        let blank = engine_with(service.clone(), Arc::new(Blank));
        let miss = blank.query("anything", 1).await;
        assert_eq!(miss.response_text, prompt::RAG_MISS_FALLBACK);
        assert!(miss.degradations.contains(&Degradation::EmptyGeneration));

        blank
            .ingest(Corpus::Prepared(vec![hotel_chunk("a_chunk_0", "A", "tango lessons")]))
            .await
            .unwrap();
        let grounded = blank.query("tango lessons", 1).await;
        assert_eq!(grounded.response_text, prompt::EMPTY_GROUNDED_FALLBACK);

        let broken = engine_with(service, Arc::new(Broken));
        let failed = broken.query("tango lessons", 1).await;
        assert_eq!(failed.response_text, prompt::GENERATION_APOLOGY);
        assert!(matches!(
            failed.degradations.last(),
            Some(Degradation::GenerationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_reingest_keeps_store_size() {
        let service = Arc::new(InMemoryVectorService::new());
        let engine = engine_with(service.clone(), Arc::new(Echo));
        let chunks = vec![
            hotel_chunk("a_chunk_0", "A", "first"),
            hotel_chunk("a_chunk_1", "A", "second"),
        ];
        engine.ingest(Corpus::Prepared(chunks.clone())).await.unwrap();
        engine.ingest(Corpus::Prepared(chunks)).await.unwrap();

        assert_eq!(engine.store().len().await, 2);
        let index = &service.list_indexes("travel_documents_index").await.unwrap()[0];
        assert_eq!(service.point_count(&index.name).await, 2);
    }

    #[tokio::test]
    async fn test_ingest_fails_hard_when_bring_up_fails() {
        let service = Arc::new(InMemoryVectorService::new());
        service.fail(FailPoint::CreateIndex).await;
        let engine = engine_with(service, Arc::new(Echo));
        let err = engine
            .ingest(Corpus::Prepared(vec![hotel_chunk("a", "A", "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Infrastructure(_)));
        assert!(engine.store().is_empty().await);
    }
}
