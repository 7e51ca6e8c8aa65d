//! MemoryComposer: personalized answers from the document engine plus a
//! per-user memory engine.
//!
//! Memory for every user lives in one shared index. Searches carry a `user_id`
//! restrict, and every hit is checked again against the chunk store's own
//! `user_id` before it is used, so one user's memory never reaches another
//! user's prompt.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use wayfinder_core::config::MemoryConfig;
use wayfinder_core::models::{Degradation, Restrict, RetrievedChunk};
use wayfinder_core::{GenerationRequest, Generator, RagError, RagResult};
use wayfinder_ingest::MemoryProcessor;

use super::engine::{generate_bounded, Corpus, IngestReport, Retrieval, RetrievalEngine};
use crate::prompt;

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserContext {
    pub hits: Vec<RetrievedChunk>,
    pub degradations: Vec<Degradation>,
}

impl UserContext {
    pub fn text(&self) -> String {
        self.hits
            .iter()
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposedResult {
    pub response_text: String,
    pub profile_summary: Option<String>,
    pub personal_hits: Vec<RetrievedChunk>,
    pub document_hits: Vec<RetrievedChunk>,
    pub prompt: String,
    pub degradations: Vec<Degradation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Experience {
    pub destination: Option<String>,
    pub year: Option<Value>,
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreferenceInsight {
    pub budget_range: Option<String>,
    pub travel_style: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PersonalizationInsights {
    pub has_user_context: bool,
    pub context_types: Vec<String>,
    pub relevant_experiences: Vec<Experience>,
    pub preferences: PreferenceInsight,
    pub profile_summary: Option<String>,
}

pub struct MemoryComposer {
    documents: Arc<RetrievalEngine>,
    memory: Arc<RetrievalEngine>,
    profiles: RwLock<MemoryProcessor>,
    generator: Arc<dyn Generator>,
    config: MemoryConfig,
    call_timeout: Duration,
}

impl MemoryComposer {
    pub fn new(
        documents: Arc<RetrievalEngine>,
        memory: Arc<RetrievalEngine>,
        generator: Arc<dyn Generator>,
        config: MemoryConfig,
        call_timeout: Duration,
    ) -> Self {
        let profiles = RwLock::new(MemoryProcessor::new(config.max_conversations));
        Self {
            documents,
            memory,
            profiles,
            generator,
            config,
            call_timeout,
        }
    }

    pub fn documents(&self) -> &Arc<RetrievalEngine> {
        &self.documents
    }

    pub fn memory(&self) -> &Arc<RetrievalEngine> {
        &self.memory
    }

    pub fn is_ready(&self) -> bool {
        self.documents.is_ready() && self.memory.is_ready()
    }

    pub async fn user_count(&self) -> usize {
        self.profiles.read().await.user_count()
    }

    pub async fn profile_summary(&self, user_id: &str) -> Option<String> {
        self.profiles.read().await.profile_summary(user_id)
    }

    // ========================================================================
    // LOAD
    // ========================================================================

    pub async fn load_memory(
        &self,
        profiles_path: &Path,
        histories_path: Option<&Path>,
    ) -> RagResult<IngestReport> {
        let mut processor = MemoryProcessor::new(self.config.max_conversations);
        processor.load_profiles(profiles_path).await?;
        if let Some(path) = histories_path {
            processor.load_chat_histories(path).await?;
        }
        self.load_processor(processor).await
    }

    /// Index every memory chunk `processor` produces, then make its profiles
    /// the ones used for summaries.
    pub async fn load_processor(&self, processor: MemoryProcessor) -> RagResult<IngestReport> {
        let chunks = processor.all_chunks();
        tracing::info!(
            users = processor.user_count(),
            chunks = chunks.len(),
            "Loading user memory"
        );
        let report = self.memory.ingest(Corpus::Prepared(chunks)).await?;
        *self.profiles.write().await = processor;
        Ok(report)
    }

    // ========================================================================
    // USER CONTEXT
    // ========================================================================

    /// Memory chunks for `user_id` only, best first. `top_k == 0` uses the
    /// configured default.
    pub async fn search_user_context(
        &self,
        user_id: &str,
        query: &str,
        top_k: usize,
    ) -> RagResult<UserContext> {
        if user_id.trim().is_empty() {
            return Err(RagError::Validation("user_id is required".to_string()));
        }

        let top_k = if top_k == 0 { self.config.top_k } else { top_k };
        let fetch = top_k.saturating_mul(self.config.overfetch_factor.max(1));
        let restricts = [Restrict::new("user_id", user_id)];

        let Retrieval { hits, degradations } = self.memory.retrieve(query, fetch, &restricts).await;

        let mut kept = Vec::with_capacity(top_k);
        for hit in hits {
            if !hit.rehydrated {
                continue;
            }
            if hit.meta_str("user_id") != Some(user_id) {
                tracing::warn!(
                    chunk_id = %hit.id,
                    owner = ?hit.meta_str("user_id"),
                    "Dropping memory hit owned by another user"
                );
                continue;
            }
            kept.push(hit);
            if kept.len() == top_k {
                break;
            }
        }

        Ok(UserContext {
            hits: kept,
            degradations,
        })
    }

    // ========================================================================
    // COMPOSE
    // ========================================================================

    /// Personalized answer for `user_id`.
    ///
    /// `top_k` sizes the document retrieval only; personal context is always
    /// `memory.top_k` chunks.
    pub async fn query_with_memory(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
    ) -> RagResult<ComposedResult> {
        let documents_ready = self.documents.is_ready();
        let memory_ready = self.memory.is_ready();
        if !(documents_ready && memory_ready) {
            return Err(RagError::NotReady {
                documents: documents_ready,
                memory: memory_ready,
            });
        }

        let (travel, personal) = tokio::join!(
            self.documents.retrieve_context(query, top_k, &[]),
            self.search_user_context(user_id, query, self.config.top_k),
        );
        let personal = personal?;
        let profile_summary = self.profile_summary(user_id).await;

        let mut degradations = travel.degradations;
        degradations.extend(personal.degradations.iter().cloned());
        if profile_summary.is_none() {
            degradations.push(Degradation::NoProfile);
        }
        if personal.hits.is_empty() {
            degradations.push(Degradation::NoUserContext);
        }
        if travel.context.trim().is_empty() {
            degradations.push(Degradation::NoDocumentContext);
        }

        let prompt = prompt::personalized_prompt(
            profile_summary.as_deref().unwrap_or_default(),
            &personal.text(),
            &travel.context,
            query,
        );

        let response_text = generate_bounded(
            self.generator.as_ref(),
            GenerationRequest::prompt(prompt.clone()),
            self.call_timeout,
            prompt::PERSONALIZED_APOLOGY,
            prompt::EMPTY_PERSONALIZED_FALLBACK,
            &mut degradations,
        )
        .await;

        tracing::info!(
            user_id = %user_id,
            personal_hits = personal.hits.len(),
            document_hits = travel.hits.len(),
            degradations = degradations.len(),
            "Personalized query served"
        );

        Ok(ComposedResult {
            response_text,
            profile_summary,
            personal_hits: personal.hits,
            document_hits: travel.hits,
            prompt,
            degradations,
        })
    }

    pub async fn personalization_insights(
        &self,
        user_id: &str,
        query: &str,
    ) -> RagResult<PersonalizationInsights> {
        let context = self.search_user_context(user_id, query, 0).await?;
        let mut insights = PersonalizationInsights {
            has_user_context: !context.hits.is_empty(),
            profile_summary: self.profile_summary(user_id).await,
            ..Default::default()
        };

        for hit in &context.hits {
            let kind = hit.meta_str("type").unwrap_or("unknown");
            insights.context_types.push(kind.to_string());
            match kind {
                "past_trip" => insights.relevant_experiences.push(Experience {
                    destination: hit.meta_str("destination").map(str::to_string),
                    year: hit.metadata.get("year").cloned(),
                    purpose: hit.meta_str("purpose").map(str::to_string),
                }),
                "travel_preferences" => {
                    insights.preferences = PreferenceInsight {
                        budget_range: hit.meta_str("budget_range").map(str::to_string),
                        travel_style: hit.meta_str("travel_style").map(str::to_string),
                    }
                }
                _ => {}
            }
        }

        Ok(insights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use wayfinder_core::config::{ChunkingConfig, IndexConfig, RetrievalConfig};
    use wayfinder_core::models::{Chunk, IndexDatapoint, Metadata, UserProfile};
    use wayfinder_core::{
        EmbeddingBackend, GenerationError, HashingEmbedder, InMemoryVectorService,
    };
    use wayfinder_ingest::DocumentProcessor;

    use crate::subsystems::chunk_store::ChunkStore;
    use crate::subsystems::vector_index::VectorIndex;

    struct Canned;

    #[async_trait]
    impl Generator for Canned {
        async fn generate(&self, _: GenerationRequest) -> Result<String, GenerationError> {
            Ok("Try the tango halls in San Telmo.".to_string())
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn engine(
        name: &str,
        service: Arc<InMemoryVectorService>,
        index: IndexConfig,
        restrict_keys: &[&str],
    ) -> Arc<RetrievalEngine> {
        let embedder = Arc::new(HashingEmbedder::new(64));
        Arc::new(RetrievalEngine::new(
            name,
            Arc::new(VectorIndex::new(service, embedder.clone(), index)),
            Arc::new(ChunkStore::new()),
            DocumentProcessor::new(embedder, ChunkingConfig::default()).with_restrict_keys(restrict_keys),
            Arc::new(Canned),
            RetrievalConfig::default(),
        ))
    }

    fn profile(user_id: &str, name: &str, destination: &str) -> UserProfile {
        serde_json::from_value(json!({
            "user_id": user_id,
            "name": name,
            "travel_preferences": { "budget_range": "luxury", "travel_style": "relaxed", "interests": ["tango"] },
            "past_trips": [{ "destination": destination, "year": 2023, "purpose": "leisure" }]
        }))
        .unwrap()
    }

    async fn composer() -> MemoryComposer {
        composer_with(MemoryConfig::default()).await
    }

    async fn composer_with(config: MemoryConfig) -> MemoryComposer {
        let service = Arc::new(InMemoryVectorService::new());
        let documents = engine("documents", service.clone(), IndexConfig::documents(), &["source_id"]);
        let memory = engine("memory", service, IndexConfig::memory(), &["user_id", "type"]);

        let mut meta = Metadata::new();
        meta.insert("hotel_name".to_string(), json!("Faena"));
        documents
            .ingest(Corpus::Prepared(vec![Chunk::new(
                "faena_chunk_0",
                "Faena hotel in Puerto Madero hosts tango nights",
                meta,
            )]))
            .await
            .unwrap();

        let composer = MemoryComposer::new(
            documents,
            memory,
            Arc::new(Canned),
            config,
            Duration::from_secs(5),
        );
        let mut processor = MemoryProcessor::new(5);
        processor.insert_profile(profile("U1", "Ana", "Lisbon"));
        processor.insert_profile(profile("U2", "Ben", "Tokyo"));
        composer.load_processor(processor).await.unwrap();
        composer
    }

    #[tokio::test]
    async fn test_user_context_never_crosses_users() {
        let composer = composer().await;
        for user in ["U1", "U2"] {
            let ctx = composer
                .search_user_context(user, "past trip destination leisure", 4)
                .await
                .unwrap();
            assert!(!ctx.hits.is_empty());
            assert!(ctx.hits.iter().all(|h| h.meta_str("user_id") == Some(user)));
        }
    }

    #[tokio::test]
    async fn test_post_filter_drops_mislabelled_index_entries() {
        let composer = composer().await;
        // Datapoint tagged for U1 in the index whose stored record belongs to U2.
        let mut meta = Metadata::new();
        meta.insert("user_id".to_string(), json!("U2"));
        composer
            .memory()
            .store()
            .put_many(vec![Chunk::new("leak", "Ben's secret plans", meta)])
            .await;
        let vector = HashingEmbedder::new(64).embed("Ben's secret plans").await.unwrap();
        composer
            .memory()
            .index()
            .upsert(&[IndexDatapoint {
                id: "leak".to_string(),
                vector,
                restricts: vec![Restrict::new("user_id", "U1")],
            }])
            .await
            .unwrap();

        let ctx = composer
            .search_user_context("U1", "Ben's secret plans", 2)
            .await
            .unwrap();
        assert!(ctx.hits.iter().all(|h| h.id != "leak"));
    }

    #[tokio::test]
    async fn test_empty_user_id_is_rejected() {
        let composer = composer().await;
        let err = composer.search_user_context(" ", "q", 2).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[tokio::test]
    async fn test_query_with_memory_for_unknown_user_uses_documents() {
        let composer = composer().await;
        let result = composer
            .query_with_memory("tango nights", "U9", 3)
            .await
            .unwrap();
        assert!(!result.response_text.is_empty());
        assert!(result.personal_hits.is_empty());
        assert!(result.prompt.contains(prompt::NO_PROFILE));
        assert!(result.prompt.contains(prompt::NO_USER_CONTEXT));
        assert!(result.prompt.contains("Faena"));
        assert!(result.degradations.contains(&Degradation::NoUserContext));
    }

    #[tokio::test]
    async fn test_query_with_memory_includes_profile() {
        let composer = composer().await;
        let result = composer
            .query_with_memory("tango", "U1", 3)
            .await
            .unwrap();
        assert!(result.profile_summary.as_deref().unwrap().contains("Ana"));
        assert!(result.personal_hits.iter().all(|h| h.meta_str("user_id") == Some("U1")));
        assert!(!result.prompt.contains(prompt::NO_PROFILE));
    }

    #[tokio::test]
    async fn test_not_ready_when_memory_is_empty() {
        let service = Arc::new(InMemoryVectorService::new());
        let documents = engine("documents", service.clone(), IndexConfig::documents(), &["source_id"]);
        let memory = engine("memory", service, IndexConfig::memory(), &["user_id"]);
        let composer = MemoryComposer::new(
            documents,
            memory,
            Arc::new(Canned),
            MemoryConfig::default(),
            Duration::from_secs(5),
        );

        let err = composer.query_with_memory("q", "U1", 3).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::NotReady {
                documents: false,
                memory: false
            }
        ));
    }

    #[tokio::test]
    async fn test_insights_report_trips_and_preferences() {
        // Room for every one of U1's memory chunks.
        let composer = composer_with(MemoryConfig {
            top_k: 8,
            ..MemoryConfig::default()
        })
        .await;
        let insights = composer
            .personalization_insights("U1", "Travel Preferences budget range travel style past trip")
            .await
            .unwrap();

        assert!(insights.has_user_context);
        assert!(insights.profile_summary.is_some());
        assert!(insights.context_types.iter().any(|t| t == "past_trip"));
        assert!(insights.context_types.iter().any(|t| t == "travel_preferences"));
        assert_eq!(
            insights.relevant_experiences,
            vec![Experience {
                destination: Some("Lisbon".to_string()),
                year: Some(json!(2023)),
                purpose: Some("leisure".to_string()),
            }]
        );
        assert_eq!(insights.preferences.budget_range.as_deref(), Some("luxury"));
        assert_eq!(insights.preferences.travel_style.as_deref(), Some("relaxed"));
    }

    #[tokio::test]
    async fn test_personal_context_size_comes_from_config() {
        let composer = composer().await;
        let result = composer
            .query_with_memory("past trip travel preferences profile", "U1", 10)
            .await
            .unwrap();
        assert_eq!(result.personal_hits.len(), MemoryConfig::default().top_k);
        assert!(result.document_hits.len() <= 10);
    }
}
