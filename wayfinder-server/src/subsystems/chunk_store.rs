use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use wayfinder_core::models::{Chunk, ChunkRecord};

/// Chunk id -> authoritative text and metadata.
///
/// The vector index only returns ids and distances; every hit is rehydrated
/// from here. Writes merge, so a later ingest overwrites ids it shares with an
/// earlier one and leaves the rest alone.
#[derive(Default)]
pub struct ChunkStore {
    records: RwLock<HashMap<String, Arc<ChunkRecord>>>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, chunk_id: impl Into<String>, record: ChunkRecord) {
        self.records
            .write()
            .await
            .insert(chunk_id.into(), Arc::new(record));
    }

    /// Returns how many records were written.
    pub async fn put_many(&self, chunks: Vec<Chunk>) -> usize {
        let mut records = self.records.write().await;
        let count = chunks.len();
        for chunk in chunks {
            let (id, record) = chunk.into_record();
            records.insert(id, Arc::new(record));
        }
        count
    }

    pub async fn get(&self, chunk_id: &str) -> Option<Arc<ChunkRecord>> {
        self.records.read().await.get(chunk_id).cloned()
    }

    pub async fn contains(&self, chunk_id: &str) -> bool {
        self.records.read().await.contains_key(chunk_id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
