#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use wayfinder_core::config::{
    ChunkingConfig, DataConfig, EmbeddingSettings, GcpConfig, GenerationSettings, HttpConfig,
    IndexConfig, MemoryConfig, RetrievalConfig, ServiceConfig,
};
use wayfinder_core::{
    GenerationError, GenerationRequest, Generator, HashingEmbedder, InMemoryVectorService,
    WayfinderConfig,
};
use wayfinder_server::state::AppState;

pub const DIMENSIONS: usize = 64;

/// Answers with a fixed line plus the prompt length, so tests can tell the
/// prompt changed without matching the whole template.
pub struct ScriptedGenerator;

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        Ok(format!("Scripted answer ({} prompt chars)", request.prompt.len()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn test_config() -> WayfinderConfig {
    let mut documents = IndexConfig::documents();
    documents.backend = "memory".to_string();
    let mut memory = IndexConfig::memory();
    memory.backend = "memory".to_string();

    WayfinderConfig {
        service: ServiceConfig {
            socket_path: "/tmp/wayfinder-test.sock".to_string(),
            log_level: "debug".to_string(),
        },
        http: HttpConfig::default(),
        gcp: GcpConfig::default(),
        embedding: EmbeddingSettings {
            backend: "hashing".to_string(),
            model: "hashing".to_string(),
            dimensions: DIMENSIONS as u32,
            batch_size: 100,
            max_retries: 0,
            retry_delay_ms: 2,
            timeout_seconds: 5,
        },
        generation: GenerationSettings::default(),
        documents_index: documents,
        memory_index: memory,
        chunking: ChunkingConfig {
            chunk_size: 200,
            chunk_overlap: 20,
            ..ChunkingConfig::default()
        },
        retrieval: RetrievalConfig::default(),
        memory: MemoryConfig::default(),
        data: DataConfig::default(),
    }
}

/// Engines on one in-memory vector service with the hashing embedder.
pub fn app() -> (Arc<AppState>, Arc<InMemoryVectorService>) {
    let service = Arc::new(InMemoryVectorService::new());
    let state = AppState::assemble(
        test_config(),
        Arc::new(HashingEmbedder::new(DIMENSIONS)),
        service.clone(),
        service.clone(),
        Arc::new(ScriptedGenerator),
    );
    (Arc::new(state), service)
}

/// Write `contents` into a fresh file under the system temp dir.
pub fn temp_file(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "wayfinder-test-{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

pub fn hotel_corpus() -> PathBuf {
    let lines = [
        json!({
            "hotel_name": "Alvear Palace",
            "hotel_address": "Av. Alvear 1891, Recoleta",
            "hotel_description": "Classic palace hotel in Recoleta with butler service and a rooftop restaurant."
        }),
        json!({
            "hotel_name": "Magnolia",
            "hotel_address": "Julián Álvarez 1746, Palermo",
            "hotel_description": "Boutique hotel in a restored Palermo mansion close to tango milongas."
        }),
    ];
    let body = lines
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    temp_file("hotels.ndjson", &format!("{}\nnot json\n", body))
}

pub fn profiles_file() -> PathBuf {
    let profiles = json!([
        {
            "user_id": "user_001",
            "name": "Ana",
            "location": "Madrid",
            "languages": ["Spanish"],
            "travel_preferences": { "budget_range": "luxury", "travel_style": "cultural", "interests": ["tango"] },
            "past_trips": [{ "destination": "Lisbon", "year": 2022, "purpose": "leisure" }]
        },
        {
            "user_id": "user_002",
            "name": "Ben",
            "location": "Toronto",
            "travel_preferences": { "budget_range": "budget", "travel_style": "adventure", "interests": ["hiking"] },
            "past_trips": [{ "destination": "Patagonia", "year": 2023, "purpose": "trekking" }]
        }
    ]);
    temp_file("profiles.json", &profiles.to_string())
}

pub fn histories_file() -> PathBuf {
    let histories = json!({
        "user_001": {
            "conversations": [{
                "conversation_id": "c1",
                "date": "2024-05-01",
                "messages": [
                    { "role": "user", "content": "Which hotel in Recoleta is best for a tango weekend?" },
                    { "role": "assistant", "content": "Alvear Palace is a classic choice." }
                ]
            }]
        }
    });
    temp_file("histories.json", &histories.to_string())
}

/// Corpus and memory loaded, both engines ready.
pub async fn loaded_app() -> (Arc<AppState>, Arc<InMemoryVectorService>) {
    let (state, service) = app();
    state.initialize().await.unwrap();
    state
        .documents
        .ingest(wayfinder_server::subsystems::engine::Corpus::Ndjson(hotel_corpus()))
        .await
        .unwrap();
    state
        .composer
        .load_memory(&profiles_file(), Some(histories_file().as_path()))
        .await
        .unwrap();
    (state, service)
}
