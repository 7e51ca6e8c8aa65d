//! Ingestion side of Wayfinder: chunking, per-document embedding, and
//! conversion of user profiles and chat histories into memory chunks.

pub mod chunker;
pub mod memory;
pub mod processor;

pub use chunker::{chunk, normalize_whitespace};
pub use memory::MemoryProcessor;
pub use processor::{CorpusReport, DocumentProcessor, ProcessedCorpus, ProcessedDocument};
