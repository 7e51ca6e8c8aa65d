use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct WayfinderConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub gcp: GcpConfig,
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default = "IndexConfig::documents")]
    pub documents_index: IndexConfig,
    #[serde(default = "IndexConfig::memory")]
    pub memory_index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GcpConfig {
    pub project_id: String,
    pub location: String,
    /// Overrides `https://{location}-aiplatform.googleapis.com/v1`.
    pub vertex_base_url: Option<String>,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: "us-central1".to_string(),
            vertex_base_url: None,
        }
    }
}

impl GcpConfig {
    pub fn vertex_base_url(&self) -> String {
        self.vertex_base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com/v1", self.location))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingSettings {
    /// `gemini` or `hashing`
    pub backend: String,
    pub model: String,
    pub dimensions: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.7,
            max_output_tokens: 1024,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `vertex` or `memory`
    pub backend: String,
    pub index_display_name: String,
    pub endpoint_display_name: String,
    pub deployed_index_id: String,
    #[serde(default = "default_distance_measure")]
    pub distance_measure: String,
    #[serde(default = "default_approximate_neighbors")]
    pub approximate_neighbors_count: u32,
    #[serde(default = "default_leaf_node_embedding_count")]
    pub leaf_node_embedding_count: u32,
    #[serde(default = "default_leaf_nodes_to_search_percent")]
    pub leaf_nodes_to_search_percent: u32,
    #[serde(default = "default_operation_poll_ms")]
    pub operation_poll_ms: u64,
    #[serde(default = "default_operation_timeout_seconds")]
    pub operation_timeout_seconds: u64,
}

impl IndexConfig {
    pub fn documents() -> Self {
        Self::named("travel_documents_index", "travel_index_endpoint", "travel_index_deploy_v2")
    }

    pub fn memory() -> Self {
        Self::named("user_memory_index", "user_memory_endpoint", "user_memory_deploy_v1")
    }

    fn named(index: &str, endpoint: &str, deployed: &str) -> Self {
        Self {
            backend: "vertex".to_string(),
            index_display_name: index.to_string(),
            endpoint_display_name: endpoint.to_string(),
            deployed_index_id: deployed.to_string(),
            distance_measure: default_distance_measure(),
            approximate_neighbors_count: default_approximate_neighbors(),
            leaf_node_embedding_count: default_leaf_node_embedding_count(),
            leaf_nodes_to_search_percent: default_leaf_nodes_to_search_percent(),
            operation_poll_ms: default_operation_poll_ms(),
            operation_timeout_seconds: default_operation_timeout_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub text_fields: Vec<String>,
    pub metadata_fields: Vec<String>,
    pub id_field: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            text_fields: vec!["hotel_description".to_string(), "text".to_string()],
            metadata_fields: vec![
                "hotel_name".to_string(),
                "hotel_address".to_string(),
                "nearest_attractions".to_string(),
            ],
            id_field: "hotel_name".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    pub upsert_batch_size: usize,
    pub call_timeout_seconds: u64,
    pub provenance_field: String,
    pub provenance_label: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            upsert_batch_size: 500,
            call_timeout_seconds: 30,
            provenance_field: "hotel_name".to_string(),
            provenance_label: "hotel".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    pub profiles_path: Option<String>,
    pub chat_histories_path: Option<String>,
    pub max_conversations: usize,
    pub overfetch_factor: usize,
    pub top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            profiles_path: None,
            chat_histories_path: None,
            max_conversations: 5,
            overfetch_factor: 2,
            top_k: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DataConfig {
    /// NDJSON corpus ingested at startup.
    pub corpus_path: Option<String>,
}

fn default_batch_size() -> u32 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_distance_measure() -> String {
    "COSINE_DISTANCE".to_string()
}

fn default_approximate_neighbors() -> u32 {
    10
}

fn default_leaf_node_embedding_count() -> u32 {
    500
}

fn default_leaf_nodes_to_search_percent() -> u32 {
    7
}

fn default_operation_poll_ms() -> u64 {
    5_000
}

fn default_operation_timeout_seconds() -> u64 {
    3_600
}

/// Expand `~` and `$VAR` in a configured path, falling back to the raw value.
pub fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

impl WayfinderConfig {
    /// Load from a TOML file, then apply `WAYFINDER__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("WAYFINDER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Message(msg.to_string()));

        if self.chunking.chunk_size == 0 {
            return invalid("chunking.chunk_size must be greater than zero");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return invalid("chunking.chunk_overlap must be smaller than chunking.chunk_size");
        }
        if self.embedding.dimensions == 0 {
            return invalid("embedding.dimensions must be greater than zero");
        }
        if self.embedding.batch_size == 0 || self.retrieval.upsert_batch_size == 0 {
            return invalid("batch sizes must be greater than zero");
        }
        for index in [&self.documents_index, &self.memory_index] {
            if index.index_display_name.is_empty()
                || index.endpoint_display_name.is_empty()
                || index.deployed_index_id.is_empty()
            {
                return invalid("index display names and deployed index id must not be empty");
            }
        }
        Ok(())
    }
}
