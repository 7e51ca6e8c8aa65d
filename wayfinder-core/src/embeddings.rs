//! Embedding backends for Wayfinder
//!
//! Provides an `EmbeddingBackend` trait with implementations for:
//! - **Gemini**: cloud embeddings via the Gemini API (single and batch calls)
//! - **Hashing**: deterministic local bag-of-words vectors for offline runs and tests
//!
//! Batch embedding is positionally aligned: slot `i` of the output always
//! belongs to text `i` of the input, and a failure only affects its own slot.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// Default embedding dimensions (text-embedding-005)
pub const DEFAULT_DIMENSIONS: usize = 768;

/// Gemini caps `batchEmbedContents` at 100 requests.
const GEMINI_MAX_BATCH: usize = 100;

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single document text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a search query. Backends that support task-type hints
    /// use `RETRIEVAL_QUERY` here. Defaults to calling `embed()`.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(text).await
    }

    /// Embed many texts. The output has exactly one slot per input text, in order.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await);
        }
        out
    }

    /// Returns the embedding dimension.
    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Task type for embedding API
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    #[default]
    RetrievalDocument,
    RetrievalQuery,
}

/// Embedding generation errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Missing embedding in response")]
    MissingEmbedding,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Cannot embed empty text")]
    EmptyInput,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },

    #[error("Unknown embedding backend: {0}")]
    UnknownBackend(String),
}

// ============================================================================
// Config types
// ============================================================================

/// Gemini embedding client configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
}

impl EmbeddingConfig {
    pub fn new(api_key: Option<String>, model: String, dimensions: usize) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model,
            dimensions,
            batch_size: GEMINI_MAX_BATCH,
            max_retries: 3,
            retry_delay_ms: 500,
            timeout_seconds: 30,
        }
    }

    pub fn from_settings(settings: &crate::config::EmbeddingSettings) -> Self {
        Self {
            batch_size: settings.batch_size as usize,
            max_retries: settings.max_retries as usize,
            retry_delay_ms: settings.retry_delay_ms,
            timeout_seconds: settings.timeout_seconds,
            ..Self::new(None, settings.model.clone(), settings.dimensions as usize)
        }
    }
}

/// Configuration union for the backend factory.
pub enum BackendConfig {
    Gemini(EmbeddingConfig),
    Hashing { dimensions: usize },
}

impl BackendConfig {
    pub fn from_settings(
        settings: &crate::config::EmbeddingSettings,
    ) -> Result<Self, EmbeddingError> {
        match settings.backend.as_str() {
            "gemini" => Ok(BackendConfig::Gemini(EmbeddingConfig::from_settings(settings))),
            "hashing" => Ok(BackendConfig::Hashing {
                dimensions: settings.dimensions as usize,
            }),
            other => Err(EmbeddingError::UnknownBackend(other.to_string())),
        }
    }
}

/// Create the appropriate backend from configuration.
pub fn create_backend(config: BackendConfig) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
    match config {
        BackendConfig::Gemini(c) => Ok(Box::new(GeminiEmbeddingClient::new(c)?)),
        BackendConfig::Hashing { dimensions } => Ok(Box::new(HashingEmbedder::new(dimensions))),
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    model: String,
    content: GeminiContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_type: Option<TaskType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiBatchRequest {
    requests: Vec<GeminiRequest>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    embedding: GeminiEmbedding,
}

#[derive(Debug, Deserialize)]
struct GeminiBatchResponse {
    #[serde(default)]
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

/// Turn a non-success response into `EmbeddingError::Api`.
async fn api_error(response: reqwest::Response) -> EmbeddingError {
    let status = response.status();
    let error_body = response.text().await.unwrap_or_default();
    let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
        .ok()
        .and_then(|e| e.error);

    let (code, message) = error_detail
        .map(|e| (e.code, e.message))
        .unwrap_or((status.as_u16(), error_body));

    tracing::error!(code = code, message = %message, "Gemini API error");

    EmbeddingError::Api { code, message }
}

// ============================================================================
// GeminiEmbeddingClient
// ============================================================================

/// Gemini embedding client: calls the Gemini Embeddings API.
///
/// The HTTP client is built on first use; concurrent first callers share one build.
#[derive(Debug)]
pub struct GeminiEmbeddingClient {
    client: OnceCell<Client>,
    config: EmbeddingConfig,
    base_url: String,
}

impl GeminiEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(
            config,
            "https://generativelanguage.googleapis.com/v1beta".to_string(),
        )
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: EmbeddingConfig,
        base_url: String,
    ) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        Ok(Self {
            client: OnceCell::new(),
            config,
            base_url,
        })
    }

    async fn http(&self) -> Result<&Client, EmbeddingError> {
        self.client
            .get_or_try_init(|| async move {
                tracing::debug!(model = %self.config.model, "Building Gemini embedding HTTP client");
                Client::builder()
                    .timeout(Duration::from_secs(self.config.timeout_seconds))
                    .build()
                    .map_err(EmbeddingError::Http)
            })
            .await
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(self.config.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries)
    }

    fn request_for(&self, text: &str, task_type: TaskType) -> GeminiRequest {
        GeminiRequest {
            model: format!("models/{}", self.config.model),
            content: GeminiContent {
                parts: vec![GeminiPart {
                    text: text.to_string(),
                }],
            },
            task_type: Some(task_type),
            output_dimensionality: Some(self.config.dimensions),
        }
    }

    fn check_dimensions(&self, values: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
        if values.len() != self.config.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.config.dimensions,
                actual: values.len(),
            });
        }
        Ok(values)
    }

    /// Generate an embedding with a specific task type
    pub async fn embed_with_task(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let result = Retry::spawn(self.retry_strategy(), || self.embed_once(text, task_type)).await;

        match result {
            Ok(vec) => Ok(vec),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All embedding retry attempts failed"
                );
                Err(EmbeddingError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn embed_once(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.config.model, self.config.api_key
        );

        let request = self.request_for(text, task_type);
        let response = self.http().await?.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let gemini_response: GeminiResponse = response.json().await?;
        self.check_dimensions(gemini_response.embedding.values)
    }

    /// One `batchEmbedContents` call for up to `GEMINI_MAX_BATCH` texts.
    async fn embed_batch_once(
        &self,
        texts: &[String],
        task_type: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.base_url, self.config.model, self.config.api_key
        );

        let request = GeminiBatchRequest {
            requests: texts.iter().map(|t| self.request_for(t, task_type)).collect(),
        };
        let response = self.http().await?.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let batch: GeminiBatchResponse = response.json().await?;
        if batch.embeddings.len() != texts.len() {
            return Err(EmbeddingError::MissingEmbedding);
        }
        Ok(batch.embeddings.into_iter().map(|e| e.values).collect())
    }

    async fn embed_group(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let batch = Retry::spawn(self.retry_strategy(), || {
            self.embed_batch_once(texts, TaskType::RetrievalDocument)
        })
        .await;

        match batch {
            // Dimension checks are per slot so one bad vector fails only itself.
            Ok(vectors) => vectors
                .into_iter()
                .map(|v| self.check_dimensions(v))
                .collect(),
            Err(e) => {
                tracing::warn!(
                    size = texts.len(),
                    error = %e,
                    "Batch embedding failed, falling back to per-item calls"
                );
                let mut out = Vec::with_capacity(texts.len());
                for text in texts {
                    out.push(self.embed_with_task(text, TaskType::RetrievalDocument).await);
                }
                out
            }
        }
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalQuery).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let group_size = self.config.batch_size.clamp(1, GEMINI_MAX_BATCH);
        let mut out = Vec::with_capacity(texts.len());

        for group in texts.chunks(group_size) {
            // Empty slots never reach the API; they keep their position as errors.
            let live: Vec<(usize, String)> = group
                .iter()
                .enumerate()
                .filter(|(_, t)| !t.trim().is_empty())
                .map(|(i, t)| (i, t.clone()))
                .collect();
            let live_texts: Vec<String> = live.iter().map(|(_, t)| t.clone()).collect();

            let mut slots: Vec<Result<Vec<f32>, EmbeddingError>> = group
                .iter()
                .map(|_| Err(EmbeddingError::EmptyInput))
                .collect();

            if !live_texts.is_empty() {
                let results = self.embed_group(&live_texts).await;
                for ((slot, _), result) in live.into_iter().zip(results) {
                    slots[slot] = result;
                }
            }
            out.extend(slots);
        }

        out
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// HashingEmbedder
// ============================================================================

/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed (FNV-1a) into a signed bucket;
/// the result is L2-normalized so cosine distance behaves. Texts sharing
/// vocabulary land close together, which is enough for offline runs.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn fnv1a(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }

    fn vectorize(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let lowered = trimmed.to_lowercase();
        let mut tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            tokens.push(lowered.as_str());
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokens {
            let hash = Self::fnv1a(token);
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        } else {
            // Every token cancelled out; keep a stable non-zero direction.
            let bucket = (Self::fnv1a(&lowered) % self.dimensions as u64) as usize;
            vector[bucket] = 1.0;
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingBackend for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.vectorize(text)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

// ============================================================================
// TESTS
// ============================================================================
