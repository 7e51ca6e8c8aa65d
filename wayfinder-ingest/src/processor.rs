//! Document processing: NDJSON records -> chunks -> embedded datapoints.
//!
//! Each document's chunks are embedded with one batch call. A chunk whose
//! embedding failed is dropped from both the datapoint list and the chunk list,
//! so everything handed to the index has text to rehydrate.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use wayfinder_core::config::ChunkingConfig;
use wayfinder_core::models::{Chunk, IndexDatapoint, Metadata, Restrict};
use wayfinder_core::{EmbeddingBackend, RagError};

use crate::chunker;

/// Output of processing one document (or one prepared batch).
#[derive(Debug, Default)]
pub struct ProcessedDocument {
    pub datapoints: Vec<IndexDatapoint>,
    pub chunks: Vec<Chunk>,
    pub failed_embeddings: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CorpusReport {
    pub documents: usize,
    pub chunks_produced: usize,
    pub chunks_embedded: usize,
    pub malformed_lines: usize,
    pub documents_without_text: usize,
    pub failed_embeddings: usize,
}

#[derive(Debug, Default)]
pub struct ProcessedCorpus {
    pub datapoints: Vec<IndexDatapoint>,
    pub chunks: Vec<Chunk>,
    pub report: CorpusReport,
}

pub struct DocumentProcessor {
    embedder: Arc<dyn EmbeddingBackend>,
    config: ChunkingConfig,
    /// Metadata keys copied onto each datapoint as search restricts.
    restrict_keys: Vec<String>,
}

impl DocumentProcessor {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>, config: ChunkingConfig) -> Self {
        Self {
            embedder,
            config,
            restrict_keys: vec!["source_id".to_string()],
        }
    }

    pub fn with_restrict_keys(mut self, keys: &[&str]) -> Self {
        self.restrict_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingBackend> {
        &self.embedder
    }

    /// First non-empty configured text field.
    fn primary_text<'a>(&self, document: &'a Value) -> Option<&'a str> {
        self.config
            .text_fields
            .iter()
            .filter_map(|f| document.get(f).and_then(|v| v.as_str()))
            .find(|t| !t.trim().is_empty())
    }

    /// `"{file_name}_{identifier}"`, identifier falling back to `line_{n}`.
    pub fn source_id(&self, file_name: &str, document: &Value, line_number: usize) -> String {
        let identifier = match document.get(&self.config.id_field) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => format!("line_{}", line_number),
        };
        format!("{}_{}", file_name, identifier)
    }

    /// Chunk a document without embedding. No primary text gives no chunks.
    pub fn chunk_document(&self, document: &Value, source_id: &str) -> Result<Vec<Chunk>, RagError> {
        let object = document.as_object().ok_or_else(|| {
            RagError::Validation(format!("document {} is not a JSON object", source_id))
        })?;

        let text = match self.primary_text(document) {
            Some(t) => t,
            None => {
                tracing::warn!(
                    source_id = %source_id,
                    fields = ?self.config.text_fields,
                    "Document has no text field, skipping"
                );
                return Ok(Vec::new());
            }
        };

        let mut metadata = Metadata::new();
        for field in &self.config.metadata_fields {
            if let Some(value) = object.get(field) {
                if !value.is_null() {
                    metadata.insert(field.clone(), value.clone());
                }
            }
        }
        metadata.insert("source_id".to_string(), Value::String(source_id.to_string()));

        Ok(
            chunker::chunk(text, self.config.chunk_size, self.config.chunk_overlap)
                .into_iter()
                .enumerate()
                .map(|(i, piece)| {
                    Chunk::new(format!("{}_chunk_{}", source_id, i), piece, metadata.clone())
                })
                .collect(),
        )
    }

    /// Chunk and embed one document.
    pub async fn process(&self, document: &Value, source_id: &str) -> Result<ProcessedDocument, RagError> {
        let chunks = self.chunk_document(document, source_id)?;
        Ok(self.process_prepared(chunks).await)
    }

    fn restricts_for(&self, chunk: &Chunk) -> Vec<Restrict> {
        self.restrict_keys
            .iter()
            .filter_map(|k| chunk.meta_str(k).map(|v| Restrict::new(k.clone(), v)))
            .collect()
    }

    /// Embed already-built chunks in one batch, dropping any that failed.
    pub async fn process_prepared(&self, chunks: Vec<Chunk>) -> ProcessedDocument {
        if chunks.is_empty() {
            return ProcessedDocument::default();
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await;

        let mut out = ProcessedDocument::default();
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            match vector {
                Ok(vector) => {
                    out.datapoints.push(IndexDatapoint {
                        id: chunk.chunk_id.clone(),
                        vector,
                        restricts: self.restricts_for(&chunk),
                    });
                    out.chunks.push(chunk);
                }
                Err(e) => {
                    tracing::warn!(
                        chunk_id = %chunk.chunk_id,
                        backend = self.embedder.name(),
                        error = %e,
                        "Embedding failed, dropping chunk"
                    );
                    out.failed_embeddings += 1;
                }
            }
        }
        out
    }

    /// Read an NDJSON file and process every valid document in it.
    ///
    /// Blank lines are ignored. Malformed lines are logged and skipped.
    pub async fn process_corpus(&self, path: &Path) -> Result<ProcessedCorpus, RagError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut corpus = ProcessedCorpus::default();

        for (i, line) in raw.lines().enumerate() {
            let line_number = i + 1;
            if line.trim().is_empty() {
                continue;
            }

            let document: Value = match serde_json::from_str(line) {
                Ok(v @ Value::Object(_)) => v,
                Ok(_) => {
                    tracing::warn!(line = line_number, file = %file_name, "Line is not a JSON object, skipping");
                    corpus.report.malformed_lines += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(line = line_number, file = %file_name, error = %e, "Malformed JSON line, skipping");
                    corpus.report.malformed_lines += 1;
                    continue;
                }
            };

            corpus.report.documents += 1;
            let source_id = self.source_id(&file_name, &document, line_number);
            let chunks = self.chunk_document(&document, &source_id)?;
            if chunks.is_empty() {
                corpus.report.documents_without_text += 1;
                continue;
            }

            corpus.report.chunks_produced += chunks.len();
            let processed = self.process_prepared(chunks).await;
            corpus.report.failed_embeddings += processed.failed_embeddings;
            corpus.report.chunks_embedded += processed.datapoints.len();
            corpus.datapoints.extend(processed.datapoints);
            corpus.chunks.extend(processed.chunks);
        }

        tracing::info!(
            file = %file_name,
            documents = corpus.report.documents,
            chunks = corpus.report.chunks_embedded,
            malformed = corpus.report.malformed_lines,
            failed_embeddings = corpus.report.failed_embeddings,
            "Processed corpus"
        );

        Ok(corpus)
    }
}
