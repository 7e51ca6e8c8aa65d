//! VectorIndex: lifecycle, upsert and search over one vector search index.
//!
//! Bring-up runs three idempotent steps: find-or-create the index, find-or-create
//! the endpoint, and make sure the deployment slot serves this index. The result
//! is held in a `OnceCell`, so concurrent callers wait on one in-flight bring-up
//! and a failed attempt leaves the index uninitialized for the next caller.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use wayfinder_core::config::IndexConfig;
use wayfinder_core::models::{IndexDatapoint, Restrict, SearchHit};
use wayfinder_core::vector_service::{EndpointInfo, IndexInfo, IndexSpec, VectorService};
use wayfinder_core::{EmbeddingBackend, RagError, RagResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Uninitialized,
    Ready,
}

/// What to search with.
#[derive(Debug, Clone)]
pub enum SearchInput<'a> {
    Text(&'a str),
    Vector(Vec<f32>),
}

#[derive(Debug, Clone)]
struct Deployment {
    index: IndexInfo,
    endpoint: EndpointInfo,
}

pub struct VectorIndex {
    service: Arc<dyn VectorService>,
    embedder: Arc<dyn EmbeddingBackend>,
    config: IndexConfig,
    dimensions: usize,
    deployment: OnceCell<Deployment>,
}

impl VectorIndex {
    /// Index dimension follows the embedder.
    pub fn new(
        service: Arc<dyn VectorService>,
        embedder: Arc<dyn EmbeddingBackend>,
        config: IndexConfig,
    ) -> Self {
        let dimensions = embedder.dimensions();
        Self {
            service,
            embedder,
            config,
            dimensions,
            deployment: OnceCell::new(),
        }
    }

    pub fn status(&self) -> IndexStatus {
        if self.deployment.initialized() {
            IndexStatus::Ready
        } else {
            IndexStatus::Uninitialized
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status() == IndexStatus::Ready
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn display_name(&self) -> &str {
        &self.config.index_display_name
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingBackend> {
        &self.embedder
    }

    /// No-op once ready.
    pub async fn initialize(&self) -> RagResult<()> {
        self.deployment().await.map(|_| ())
    }

    async fn deployment(&self) -> RagResult<&Deployment> {
        self.deployment
            .get_or_try_init(|| async {
                let result = self.bring_up().await;
                if let Err(e) = &result {
                    tracing::error!(
                        index = %self.config.index_display_name,
                        error = %e,
                        "Vector index bring-up failed"
                    );
                }
                result
            })
            .await
    }

    async fn bring_up(&self) -> RagResult<Deployment> {
        tracing::info!(
            index = %self.config.index_display_name,
            endpoint = %self.config.endpoint_display_name,
            deployed_index_id = %self.config.deployed_index_id,
            backend = self.service.name(),
            "Bringing up vector index"
        );

        let index = self.ensure_index().await?;
        let endpoint = self.ensure_endpoint().await?;
        let endpoint = self.ensure_deployment(&index, endpoint).await?;

        tracing::info!(index = %index.name, endpoint = %endpoint.name, "Vector index ready");
        Ok(Deployment { index, endpoint })
    }

    async fn ensure_index(&self) -> RagResult<IndexInfo> {
        let existing = self
            .service
            .list_indexes(&self.config.index_display_name)
            .await
            .map_err(RagError::infrastructure)?;

        if existing.len() > 1 {
            tracing::warn!(
                display_name = %self.config.index_display_name,
                count = existing.len(),
                "Several indexes share a display name, using the first"
            );
        }

        if let Some(index) = existing.into_iter().next() {
            if let Some(actual) = index.dimensions {
                if actual != self.dimensions {
                    return Err(RagError::Infrastructure(format!(
                        "index {} has {} dimensions, embedder produces {}",
                        index.name, actual, self.dimensions
                    )));
                }
            }
            tracing::info!(index = %index.name, "Found existing index");
            return Ok(index);
        }

        let spec = IndexSpec {
            display_name: self.config.index_display_name.clone(),
            dimensions: self.dimensions,
            distance_measure: self.config.distance_measure.clone(),
            approximate_neighbors_count: self.config.approximate_neighbors_count,
            leaf_node_embedding_count: self.config.leaf_node_embedding_count,
            leaf_nodes_to_search_percent: self.config.leaf_nodes_to_search_percent,
        };
        let index = self
            .service
            .create_index(&spec)
            .await
            .map_err(RagError::infrastructure)?;
        tracing::info!(index = %index.name, "Created index");
        Ok(index)
    }

    async fn ensure_endpoint(&self) -> RagResult<EndpointInfo> {
        let existing = self
            .service
            .list_endpoints(&self.config.endpoint_display_name)
            .await
            .map_err(RagError::infrastructure)?;

        if let Some(endpoint) = existing.into_iter().next() {
            tracing::info!(endpoint = %endpoint.name, "Found existing endpoint");
            return Ok(endpoint);
        }

        let endpoint = self
            .service
            .create_endpoint(&self.config.endpoint_display_name)
            .await
            .map_err(RagError::infrastructure)?;
        tracing::info!(endpoint = %endpoint.name, "Created endpoint");
        Ok(endpoint)
    }

    /// Make the configured slot serve `index`, undeploying whatever else holds it.
    async fn ensure_deployment(
        &self,
        index: &IndexInfo,
        endpoint: EndpointInfo,
    ) -> RagResult<EndpointInfo> {
        let slot = self.config.deployed_index_id.as_str();

        match endpoint.deployment(slot) {
            Some(current) if current.index == index.name => {
                tracing::info!(deployed_index_id = %slot, "Index already deployed");
                return Ok(endpoint);
            }
            Some(current) => {
                tracing::warn!(
                    deployed_index_id = %slot,
                    serving = %current.index,
                    wanted = %index.name,
                    "Deployment slot serves another index, undeploying it first"
                );
                self.service
                    .undeploy_index(&endpoint, slot)
                    .await
                    .map_err(RagError::infrastructure)?;
            }
            None => {}
        }

        self.service
            .deploy_index(&endpoint, index, slot)
            .await
            .map_err(RagError::infrastructure)?;

        self.service
            .get_endpoint(&endpoint.name)
            .await
            .map_err(RagError::infrastructure)
    }

    /// Upsert valid datapoints in one call and return the accepted ids.
    ///
    /// Entries with an empty id, an empty vector or the wrong dimension are
    /// skipped. A service failure fails the whole call.
    pub async fn upsert(&self, datapoints: &[IndexDatapoint]) -> RagResult<Vec<String>> {
        let deployment = self.deployment().await?;

        let valid: Vec<IndexDatapoint> = datapoints
            .iter()
            .filter(|d| {
                if d.id.is_empty() || d.vector.is_empty() {
                    tracing::warn!(id = %d.id, "Skipping datapoint without id or vector");
                    return false;
                }
                if d.vector.len() != self.dimensions {
                    tracing::warn!(
                        id = %d.id,
                        expected = self.dimensions,
                        actual = d.vector.len(),
                        "Skipping datapoint with wrong dimension"
                    );
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        if valid.is_empty() {
            return Ok(Vec::new());
        }

        self.service
            .upsert_datapoints(&deployment.index, &valid)
            .await
            .map_err(|e| RagError::Infrastructure(format!("upsert failed: {}", e)))?;

        tracing::debug!(count = valid.len(), index = %deployment.index.name, "Upserted datapoints");
        Ok(valid.into_iter().map(|d| d.id).collect())
    }

    /// Nearest neighbours, best first. Text input is embedded as a query.
    pub async fn search(
        &self,
        input: SearchInput<'_>,
        top_k: usize,
        restricts: &[Restrict],
    ) -> RagResult<Vec<SearchHit>> {
        let deployment = self.deployment().await?;

        let vector = match input {
            SearchInput::Text(text) => self.embedder.embed_query(text).await?,
            SearchInput::Vector(v) => v,
        };

        if vector.len() != self.dimensions {
            return Err(RagError::Search(format!(
                "query vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }

        self.service
            .find_neighbors(
                &deployment.endpoint,
                &self.config.deployed_index_id,
                &vector,
                top_k,
                restricts,
            )
            .await
            .map_err(RagError::search)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfinder_core::vector_service::{FailPoint, InMemoryVectorService};
    use wayfinder_core::HashingEmbedder;

    fn setup() -> (Arc<InMemoryVectorService>, VectorIndex) {
        let service = Arc::new(InMemoryVectorService::new());
        let index = VectorIndex::new(
            service.clone(),
            Arc::new(HashingEmbedder::new(8)),
            IndexConfig::documents(),
        );
        (service, index)
    }

    fn datapoint(id: &str, vector: Vec<f32>) -> IndexDatapoint {
        IndexDatapoint {
            id: id.to_string(),
            vector,
            restricts: vec![],
        }
    }

    #[tokio::test]
    async fn test_initialize_twice_creates_once() {
        let (service, index) = setup();
        assert_eq!(index.status(), IndexStatus::Uninitialized);

        index.initialize().await.unwrap();
        index.initialize().await.unwrap();

        let calls = service.call_counts().await;
        assert_eq!(calls.create_index, 1);
        assert_eq!(calls.create_endpoint, 1);
        assert_eq!(calls.deploy, 1);
        assert_eq!(index.status(), IndexStatus::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_runs_one_bring_up() {
        let (service, index) = setup();
        let index = Arc::new(index);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let index = index.clone();
                tokio::spawn(async move { index.initialize().await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(service.call_counts().await.create_index, 1);
    }

    #[tokio::test]
    async fn test_second_instance_reuses_existing_resources() {
        let (service, first) = setup();
        first.initialize().await.unwrap();

        let second = VectorIndex::new(
            service.clone(),
            Arc::new(HashingEmbedder::new(8)),
            IndexConfig::documents(),
        );
        second.initialize().await.unwrap();

        let calls = service.call_counts().await;
        assert_eq!(calls.create_index, 1);
        assert_eq!(calls.create_endpoint, 1);
        assert_eq!(calls.deploy, 1);
    }

    #[tokio::test]
    async fn test_failed_bring_up_stays_uninitialized_and_can_retry() {
        let (service, index) = setup();
        service.fail(FailPoint::Deploy).await;

        let err = index.initialize().await.unwrap_err();
        assert!(matches!(err, RagError::Infrastructure(_)));
        assert_eq!(index.status(), IndexStatus::Uninitialized);

        service.heal(FailPoint::Deploy).await;
        index.initialize().await.unwrap();
        assert!(index.is_ready());
        // The index and endpoint made on the first attempt are found, not recreated.
        assert_eq!(service.call_counts().await.create_index, 1);
    }

    #[tokio::test]
    async fn test_existing_index_with_other_dimension_is_rejected() {
        let (service, _) = setup();
        service
            .create_index(&IndexSpec {
                display_name: "travel_documents_index".to_string(),
                dimensions: 4,
                distance_measure: "COSINE_DISTANCE".to_string(),
                approximate_neighbors_count: 10,
                leaf_node_embedding_count: 500,
                leaf_nodes_to_search_percent: 7,
            })
            .await
            .unwrap();

        let index = VectorIndex::new(service.clone(), Arc::new(HashingEmbedder::new(8)), IndexConfig::documents());
        let err = index.initialize().await.unwrap_err();
        assert!(err.to_string().contains("4 dimensions"));
    }

    #[tokio::test]
    async fn test_conflicting_deployment_is_replaced() {
        let (service, _) = setup();
        let stale = service
            .create_index(&IndexSpec {
                display_name: "old_index".to_string(),
                dimensions: 8,
                distance_measure: "COSINE_DISTANCE".to_string(),
                approximate_neighbors_count: 10,
                leaf_node_embedding_count: 500,
                leaf_nodes_to_search_percent: 7,
            })
            .await
            .unwrap();
        let endpoint = service.create_endpoint("travel_index_endpoint").await.unwrap();
        service
            .deploy_index(&endpoint, &stale, "travel_index_deploy_v2")
            .await
            .unwrap();

        let index = VectorIndex::new(service.clone(), Arc::new(HashingEmbedder::new(8)), IndexConfig::documents());
        index.initialize().await.unwrap();

        let calls = service.call_counts().await;
        assert_eq!(calls.undeploy, 1);
        assert_eq!(calls.deploy, 2);
        let endpoint = service.get_endpoint(&endpoint.name).await.unwrap();
        let serving = endpoint.deployment("travel_index_deploy_v2").unwrap();
        assert_ne!(serving.index, stale.name);
    }

    #[tokio::test]
    async fn test_upsert_skips_invalid_entries() {
        let (service, index) = setup();
        let accepted = index
            .upsert(&[
                datapoint("good", vec![0.5; 8]),
                datapoint("", vec![0.5; 8]),
                datapoint("empty", vec![]),
                datapoint("short", vec![0.5; 3]),
            ])
            .await
            .unwrap();
        assert_eq!(accepted, vec!["good".to_string()]);
        assert_eq!(service.call_counts().await.upsert, 1);
    }

    #[tokio::test]
    async fn test_upsert_service_failure_fails_whole_call() {
        let (service, index) = setup();
        index.initialize().await.unwrap();
        service.fail(FailPoint::Upsert).await;
        assert!(index.upsert(&[datapoint("a", vec![0.1; 8])]).await.is_err());
    }

    #[tokio::test]
    async fn test_search_by_text_and_vector() {
        let (_, index) = setup();
        let embedder = HashingEmbedder::new(8);
        let tango = embedder.embed("tango show in San Telmo").await.unwrap();
        index.upsert(&[datapoint("tango", tango.clone())]).await.unwrap();

        let by_text = index
            .search(SearchInput::Text("tango show in San Telmo"), 1, &[])
            .await
            .unwrap();
        assert_eq!(by_text[0].id, "tango");
        assert!(by_text[0].distance.abs() < 1e-5);

        let by_vector = index.search(SearchInput::Vector(tango), 1, &[]).await.unwrap();
        assert_eq!(by_vector[0].id, "tango");

        let wrong = index.search(SearchInput::Vector(vec![1.0]), 1, &[]).await;
        assert!(matches!(wrong, Err(RagError::Search(_))));
    }
}
