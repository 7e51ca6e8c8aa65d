//! Vector search service abstraction
//!
//! `VectorService` is the narrow surface the index lifecycle needs: list and
//! create indexes and endpoints, deploy and undeploy, upsert datapoints and
//! nearest-neighbour queries. `VertexVectorService` (see `vertex.rs`) talks
//! to Vertex AI Vector Search; `InMemoryVectorService` is a brute-force
//! implementation for offline runs and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{IndexDatapoint, Restrict, SearchHit};

#[derive(Error, Debug)]
pub enum VectorServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Operation {name} failed: {message}")]
    OperationFailed { name: String, message: String },

    #[error("Operation {name} did not finish within {seconds}s")]
    OperationTimeout { name: String, seconds: u64 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing access token")]
    MissingToken,

    #[error("Injected failure: {0}")]
    Injected(String),
}

/// Everything needed to create an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub display_name: String,
    pub dimensions: usize,
    pub distance_measure: String,
    pub approximate_neighbors_count: u32,
    pub leaf_node_embedding_count: u32,
    pub leaf_nodes_to_search_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Fully qualified resource name.
    pub name: String,
    pub display_name: String,
    /// `None` when the service did not report it.
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedIndexRef {
    pub id: String,
    /// Resource name of the index served by this slot.
    pub index: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub name: String,
    pub display_name: String,
    pub public_domain: Option<String>,
    pub deployed: Vec<DeployedIndexRef>,
}

impl EndpointInfo {
    pub fn deployment(&self, deployed_index_id: &str) -> Option<&DeployedIndexRef> {
        self.deployed.iter().find(|d| d.id == deployed_index_id)
    }
}

#[async_trait]
pub trait VectorService: Send + Sync {
    async fn list_indexes(&self, display_name: &str) -> Result<Vec<IndexInfo>, VectorServiceError>;

    /// Creates an index and waits for the operation to finish.
    async fn create_index(&self, spec: &IndexSpec) -> Result<IndexInfo, VectorServiceError>;

    async fn list_endpoints(&self, display_name: &str)
        -> Result<Vec<EndpointInfo>, VectorServiceError>;

    async fn create_endpoint(&self, display_name: &str) -> Result<EndpointInfo, VectorServiceError>;

    /// Fresh view of one endpoint, including its deployments.
    async fn get_endpoint(&self, name: &str) -> Result<EndpointInfo, VectorServiceError>;

    async fn deploy_index(
        &self,
        endpoint: &EndpointInfo,
        index: &IndexInfo,
        deployed_index_id: &str,
    ) -> Result<(), VectorServiceError>;

    /// Synchronous: returns once the slot is free.
    async fn undeploy_index(
        &self,
        endpoint: &EndpointInfo,
        deployed_index_id: &str,
    ) -> Result<(), VectorServiceError>;

    async fn upsert_datapoints(
        &self,
        index: &IndexInfo,
        datapoints: &[IndexDatapoint],
    ) -> Result<(), VectorServiceError>;

    async fn find_neighbors(
        &self,
        endpoint: &EndpointInfo,
        deployed_index_id: &str,
        query: &[f32],
        top_k: usize,
        restricts: &[Restrict],
    ) -> Result<Vec<SearchHit>, VectorServiceError>;

    fn name(&self) -> &str;
}

/// Flatten restricts into hit metadata: `namespace -> first allowed value`.
pub fn restricts_to_metadata(restricts: &[Restrict]) -> serde_json::Map<String, serde_json::Value> {
    restricts
        .iter()
        .filter_map(|r| {
            r.allow
                .first()
                .map(|v| (r.namespace.clone(), serde_json::Value::String(v.clone())))
        })
        .collect()
}

// ============================================================================
// InMemoryVectorService
// ============================================================================

/// Operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    ListIndexes,
    CreateIndex,
    CreateEndpoint,
    Deploy,
    Upsert,
    FindNeighbors,
}

/// How many times each mutating call ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create_index: usize,
    pub create_endpoint: usize,
    pub deploy: usize,
    pub undeploy: usize,
    pub upsert: usize,
    pub find_neighbors: usize,
}

struct StoredIndex {
    info: IndexInfo,
    distance_measure: String,
    points: BTreeMap<String, IndexDatapoint>,
}

#[derive(Default)]
struct InMemoryState {
    indexes: HashMap<String, StoredIndex>,
    endpoints: HashMap<String, EndpointInfo>,
    calls: CallCounts,
    failures: HashSet<FailPoint>,
    next_id: u64,
}

impl InMemoryState {
    fn check(&self, point: FailPoint) -> Result<(), VectorServiceError> {
        if self.failures.contains(&point) {
            return Err(VectorServiceError::Injected(format!("{:?}", point)));
        }
        Ok(())
    }

    fn next_name(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("projects/local/locations/local/{}/{}", kind, self.next_id)
    }
}

/// Brute-force vector service held entirely in memory.
#[derive(Default)]
pub struct InMemoryVectorService {
    state: Mutex<InMemoryState>,
}

impl InMemoryVectorService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn call_counts(&self) -> CallCounts {
        self.state.lock().await.calls.clone()
    }

    pub async fn fail(&self, point: FailPoint) {
        self.state.lock().await.failures.insert(point);
    }

    pub async fn heal(&self, point: FailPoint) {
        self.state.lock().await.failures.remove(&point);
    }

    /// Number of datapoints stored in the named index.
    pub async fn point_count(&self, index_name: &str) -> usize {
        self.state
            .lock()
            .await
            .indexes
            .get(index_name)
            .map(|i| i.points.len())
            .unwrap_or(0)
    }
}

fn distance(measure: &str, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match measure {
        "DOT_PRODUCT_DISTANCE" => -dot,
        "SQUARED_L2_DISTANCE" => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
        _ => {
            let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if na == 0.0 || nb == 0.0 {
                1.0
            } else {
                1.0 - dot / (na * nb)
            }
        }
    }
}

/// A datapoint passes when, for every query namespace, it carries a restrict
/// in that namespace sharing at least one allowed value.
fn passes(point: &IndexDatapoint, filters: &[Restrict]) -> bool {
    filters.iter().all(|f| {
        point
            .restricts
            .iter()
            .any(|r| r.namespace == f.namespace && r.allow.iter().any(|v| f.allow.contains(v)))
    })
}

#[async_trait]
impl VectorService for InMemoryVectorService {
    async fn list_indexes(&self, display_name: &str) -> Result<Vec<IndexInfo>, VectorServiceError> {
        let state = self.state.lock().await;
        state.check(FailPoint::ListIndexes)?;
        let mut found: Vec<IndexInfo> = state
            .indexes
            .values()
            .filter(|i| i.info.display_name == display_name)
            .map(|i| i.info.clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<IndexInfo, VectorServiceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::CreateIndex)?;
        state.calls.create_index += 1;
        let name = state.next_name("indexes");
        let info = IndexInfo {
            name: name.clone(),
            display_name: spec.display_name.clone(),
            dimensions: Some(spec.dimensions),
        };
        state.indexes.insert(
            name,
            StoredIndex {
                info: info.clone(),
                distance_measure: spec.distance_measure.clone(),
                points: BTreeMap::new(),
            },
        );
        Ok(info)
    }

    async fn list_endpoints(
        &self,
        display_name: &str,
    ) -> Result<Vec<EndpointInfo>, VectorServiceError> {
        let state = self.state.lock().await;
        let mut found: Vec<EndpointInfo> = state
            .endpoints
            .values()
            .filter(|e| e.display_name == display_name)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn create_endpoint(&self, display_name: &str) -> Result<EndpointInfo, VectorServiceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::CreateEndpoint)?;
        state.calls.create_endpoint += 1;
        let name = state.next_name("indexEndpoints");
        let endpoint = EndpointInfo {
            name: name.clone(),
            display_name: display_name.to_string(),
            public_domain: None,
            deployed: Vec::new(),
        };
        state.endpoints.insert(name, endpoint.clone());
        Ok(endpoint)
    }

    async fn get_endpoint(&self, name: &str) -> Result<EndpointInfo, VectorServiceError> {
        let state = self.state.lock().await;
        state
            .endpoints
            .get(name)
            .cloned()
            .ok_or_else(|| VectorServiceError::NotFound(name.to_string()))
    }

    async fn deploy_index(
        &self,
        endpoint: &EndpointInfo,
        index: &IndexInfo,
        deployed_index_id: &str,
    ) -> Result<(), VectorServiceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::Deploy)?;
        state.calls.deploy += 1;
        if !state.indexes.contains_key(&index.name) {
            return Err(VectorServiceError::NotFound(index.name.clone()));
        }
        let stored = state
            .endpoints
            .get_mut(&endpoint.name)
            .ok_or_else(|| VectorServiceError::NotFound(endpoint.name.clone()))?;
        if stored.deployment(deployed_index_id).is_some() {
            return Err(VectorServiceError::Api {
                code: 409,
                message: format!("deployed index id {} already in use", deployed_index_id),
            });
        }
        stored.deployed.push(DeployedIndexRef {
            id: deployed_index_id.to_string(),
            index: index.name.clone(),
        });
        Ok(())
    }

    async fn undeploy_index(
        &self,
        endpoint: &EndpointInfo,
        deployed_index_id: &str,
    ) -> Result<(), VectorServiceError> {
        let mut state = self.state.lock().await;
        state.calls.undeploy += 1;
        let stored = state
            .endpoints
            .get_mut(&endpoint.name)
            .ok_or_else(|| VectorServiceError::NotFound(endpoint.name.clone()))?;
        stored.deployed.retain(|d| d.id != deployed_index_id);
        Ok(())
    }

    async fn upsert_datapoints(
        &self,
        index: &IndexInfo,
        datapoints: &[IndexDatapoint],
    ) -> Result<(), VectorServiceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::Upsert)?;
        state.calls.upsert += 1;
        let stored = state
            .indexes
            .get_mut(&index.name)
            .ok_or_else(|| VectorServiceError::NotFound(index.name.clone()))?;
        for point in datapoints {
            stored.points.insert(point.id.clone(), point.clone());
        }
        Ok(())
    }

    async fn find_neighbors(
        &self,
        endpoint: &EndpointInfo,
        deployed_index_id: &str,
        query: &[f32],
        top_k: usize,
        restricts: &[Restrict],
    ) -> Result<Vec<SearchHit>, VectorServiceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::FindNeighbors)?;
        state.calls.find_neighbors += 1;

        let index_name = state
            .endpoints
            .get(&endpoint.name)
            .and_then(|e| e.deployment(deployed_index_id))
            .map(|d| d.index.clone())
            .ok_or_else(|| VectorServiceError::NotFound(deployed_index_id.to_string()))?;
        let stored = state
            .indexes
            .get(&index_name)
            .ok_or_else(|| VectorServiceError::NotFound(index_name.clone()))?;

        let mut hits: Vec<SearchHit> = stored
            .points
            .values()
            .filter(|p| passes(p, restricts))
            .map(|p| SearchHit {
                id: p.id.clone(),
                distance: distance(&stored.distance_measure, query, &p.vector),
                metadata: restricts_to_metadata(&p.restricts),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
