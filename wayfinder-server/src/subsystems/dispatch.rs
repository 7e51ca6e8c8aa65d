//! Retriever capability and the dispatcher that fans a search out over
//! several retrievers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use wayfinder_core::models::RetrievedChunk;
use wayfinder_core::{RagError, RagResult};

use super::composer::MemoryComposer;
use super::engine::{Corpus, IngestReport, RetrievalEngine};

#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest {
    pub query: String,
    pub top_k: usize,
    pub user_id: Option<String>,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &str;

    fn is_ready(&self) -> bool;

    async fn ingest(&self, corpus: Corpus) -> RagResult<IngestReport>;

    async fn retrieve(&self, request: &RetrievalRequest) -> RagResult<Vec<RetrievedChunk>>;
}

#[async_trait]
impl Retriever for RetrievalEngine {
    fn name(&self) -> &str {
        RetrievalEngine::name(self)
    }

    fn is_ready(&self) -> bool {
        RetrievalEngine::is_ready(self)
    }

    async fn ingest(&self, corpus: Corpus) -> RagResult<IngestReport> {
        RetrievalEngine::ingest(self, corpus).await
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> RagResult<Vec<RetrievedChunk>> {
        let retrieval = RetrievalEngine::retrieve(self, &request.query, request.top_k, &[]).await;
        Ok(retrieval.hits)
    }
}

/// Per-user memory as a retriever. Needs a user id on every request.
pub struct UserMemoryRetriever {
    composer: Arc<MemoryComposer>,
}

impl UserMemoryRetriever {
    pub fn new(composer: Arc<MemoryComposer>) -> Self {
        Self { composer }
    }
}

#[async_trait]
impl Retriever for UserMemoryRetriever {
    fn name(&self) -> &str {
        "user_memory"
    }

    fn is_ready(&self) -> bool {
        self.composer.memory().is_ready()
    }

    async fn ingest(&self, corpus: Corpus) -> RagResult<IngestReport> {
        if let Corpus::Ndjson(path) = &corpus {
            return Err(RagError::Validation(format!(
                "user memory is loaded from profiles, not NDJSON ({})",
                path.display()
            )));
        }
        self.composer.memory().ingest(corpus).await
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> RagResult<Vec<RetrievedChunk>> {
        let user_id = request
            .user_id
            .as_deref()
            .ok_or_else(|| RagError::Validation("user memory search needs a user_id".to_string()))?;
        let context = self
            .composer
            .search_user_context(user_id, &request.query, request.top_k)
            .await?;
        Ok(context.hits)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourcedHit {
    pub source: String,
    #[serde(flatten)]
    pub chunk: RetrievedChunk,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchResult {
    pub hits: Vec<SourcedHit>,
    pub failures: Vec<SourceFailure>,
    pub skipped: Vec<String>,
}

/// Runs one request against every ready retriever and merges by distance.
///
/// Distances are only comparable because all indexes share one distance
/// measure. A failing retriever is reported and the rest still answer.
pub struct Dispatcher {
    retrievers: Vec<Arc<dyn Retriever>>,
}

impl Dispatcher {
    pub fn new(retrievers: Vec<Arc<dyn Retriever>>) -> Self {
        Self { retrievers }
    }

    pub fn names(&self) -> Vec<&str> {
        self.retrievers.iter().map(|r| r.name()).collect()
    }

    /// Hand `corpus` to the retriever registered as `name`.
    pub async fn ingest(&self, name: &str, corpus: Corpus) -> RagResult<IngestReport> {
        let retriever = self
            .retrievers
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| RagError::Validation(format!("no retriever named {}", name)))?;
        retriever.ingest(corpus).await
    }

    pub async fn retrieve(&self, request: &RetrievalRequest) -> DispatchResult {
        let mut result = DispatchResult::default();

        let mut active = Vec::new();
        for retriever in &self.retrievers {
            if retriever.is_ready() {
                active.push(retriever.clone());
            } else {
                result.skipped.push(retriever.name().to_string());
            }
        }

        let outcomes = join_all(active.iter().map(|r| r.retrieve(request))).await;

        let mut best: HashMap<String, SourcedHit> = HashMap::new();
        for (retriever, outcome) in active.iter().zip(outcomes) {
            match outcome {
                Ok(hits) => {
                    for chunk in hits {
                        let candidate = SourcedHit {
                            source: retriever.name().to_string(),
                            chunk,
                        };
                        match best.get(&candidate.chunk.id) {
                            Some(existing) if existing.chunk.distance <= candidate.chunk.distance => {}
                            _ => {
                                best.insert(candidate.chunk.id.clone(), candidate);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(retriever = retriever.name(), error = %e, "Retriever failed");
                    result.failures.push(SourceFailure {
                        source: retriever.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let mut hits: Vec<SourcedHit> = best.into_values().collect();
        hits.sort_by(|a, b| a.chunk.distance.total_cmp(&b.chunk.distance));
        if request.top_k > 0 {
            hits.truncate(request.top_k);
        }
        result.hits = hits;
        result
    }
}
