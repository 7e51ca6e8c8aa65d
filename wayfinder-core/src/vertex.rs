//! Vertex AI Vector Search over REST (v1)
//!
//! Control-plane calls (indexes, endpoints, deployments) return long-running
//! operations which are polled until `done`. Queries go to the endpoint's
//! public domain when it has one.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::{sleep, Instant};

use crate::models::{IndexDatapoint, Restrict, SearchHit};
use crate::vector_service::{
    restricts_to_metadata, DeployedIndexRef, EndpointInfo, IndexInfo, IndexSpec, VectorService,
    VectorServiceError,
};

#[derive(Debug, Clone)]
pub struct VertexConfig {
    pub project_id: String,
    pub location: String,
    pub base_url: String,
    pub access_token: String,
    pub operation_poll: Duration,
    pub operation_timeout: Duration,
    pub request_timeout: Duration,
}

impl VertexConfig {
    /// Token comes from `VERTEX_ACCESS_TOKEN`.
    pub fn from_settings(
        gcp: &crate::config::GcpConfig,
        index: &crate::config::IndexConfig,
        request_timeout_seconds: u64,
    ) -> Self {
        Self {
            project_id: gcp.project_id.clone(),
            location: gcp.location.clone(),
            base_url: gcp.vertex_base_url(),
            access_token: std::env::var("VERTEX_ACCESS_TOKEN").unwrap_or_default(),
            operation_poll: Duration::from_millis(index.operation_poll_ms),
            operation_timeout: Duration::from_secs(index.operation_timeout_seconds),
            request_timeout: Duration::from_secs(request_timeout_seconds),
        }
    }
}

// ============================================================================
// Wire structs (private)
// ============================================================================

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<OperationStatus>,
    response: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OperationStatus {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexResource {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

impl From<IndexResource> for IndexInfo {
    fn from(r: IndexResource) -> Self {
        let dimensions = r
            .metadata
            .as_ref()
            .and_then(|m| m.pointer("/config/dimensions"))
            .and_then(|d| d.as_u64().or_else(|| d.as_str().and_then(|s| s.parse().ok())))
            .map(|d| d as usize);
        IndexInfo {
            name: r.name,
            display_name: r.display_name,
            dimensions,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListIndexes {
    #[serde(default)]
    indexes: Vec<IndexResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointResource {
    name: String,
    #[serde(default)]
    display_name: String,
    public_endpoint_domain_name: Option<String>,
    #[serde(default)]
    deployed_indexes: Vec<DeployedIndexResource>,
}

#[derive(Debug, Deserialize)]
struct DeployedIndexResource {
    id: String,
    index: String,
}

impl From<EndpointResource> for EndpointInfo {
    fn from(r: EndpointResource) -> Self {
        EndpointInfo {
            name: r.name,
            display_name: r.display_name,
            public_domain: r.public_endpoint_domain_name.filter(|d| !d.is_empty()),
            deployed: r
                .deployed_indexes
                .into_iter()
                .map(|d| DeployedIndexRef {
                    id: d.id,
                    index: d.index,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEndpoints {
    #[serde(default)]
    index_endpoints: Vec<EndpointResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRestrict {
    namespace: String,
    #[serde(default)]
    allow_list: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireDatapoint<'a> {
    datapoint_id: &'a str,
    feature_vector: &'a [f32],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    restricts: Vec<WireRestrict>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindNeighborsResponse {
    #[serde(default)]
    nearest_neighbors: Vec<NearestNeighbors>,
}

#[derive(Debug, Deserialize)]
struct NearestNeighbors {
    #[serde(default)]
    neighbors: Vec<Neighbor>,
}

#[derive(Debug, Deserialize)]
struct Neighbor {
    datapoint: NeighborDatapoint,
    #[serde(default)]
    distance: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NeighborDatapoint {
    datapoint_id: String,
    #[serde(default)]
    restricts: Vec<WireRestrict>,
}

fn to_wire(restricts: &[Restrict]) -> Vec<WireRestrict> {
    restricts
        .iter()
        .map(|r| WireRestrict {
            namespace: r.namespace.clone(),
            allow_list: r.allow.clone(),
        })
        .collect()
}

fn from_wire(restricts: Vec<WireRestrict>) -> Vec<Restrict> {
    restricts
        .into_iter()
        .map(|r| Restrict {
            namespace: r.namespace,
            allow: r.allow_list,
        })
        .collect()
}

// ============================================================================
// VertexVectorService
// ============================================================================

pub struct VertexVectorService {
    client: OnceCell<Client>,
    config: VertexConfig,
}

impl VertexVectorService {
    pub fn new(config: VertexConfig) -> Result<Self, VectorServiceError> {
        if config.access_token.is_empty() {
            return Err(VectorServiceError::MissingToken);
        }
        Ok(Self {
            client: OnceCell::new(),
            config,
        })
    }

    async fn http(&self) -> Result<&Client, VectorServiceError> {
        self.client
            .get_or_try_init(|| async move {
                Client::builder()
                    .timeout(self.config.request_timeout)
                    .build()
                    .map_err(VectorServiceError::Http)
            })
            .await
    }

    fn parent(&self) -> String {
        format!(
            "{}/projects/{}/locations/{}",
            self.config.base_url, self.config.project_id, self.config.location
        )
    }

    fn resource_url(&self, name: &str) -> String {
        format!("{}/{}", self.config.base_url, name)
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, VectorServiceError> {
        let response = request.bearer_auth(&self.config.access_token).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or(body);
            tracing::error!(code = status.as_u16(), message = %message, "Vertex API error");
            return Err(VectorServiceError::Api {
                code: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Poll a long-running operation until it is done, returning its response.
    async fn wait(&self, mut operation: Operation) -> Result<serde_json::Value, VectorServiceError> {
        let started = Instant::now();

        loop {
            if operation.done {
                if let Some(error) = operation.error {
                    return Err(VectorServiceError::OperationFailed {
                        name: operation.name,
                        message: error.message,
                    });
                }
                return Ok(operation.response.unwrap_or(serde_json::Value::Null));
            }

            if started.elapsed() >= self.config.operation_timeout {
                return Err(VectorServiceError::OperationTimeout {
                    name: operation.name,
                    seconds: self.config.operation_timeout.as_secs(),
                });
            }

            tracing::debug!(operation = %operation.name, "Waiting for Vertex operation");
            sleep(self.config.operation_poll).await;

            let url = self.resource_url(&operation.name);
            operation = self.send(self.http().await?.get(&url)).await?;
        }
    }

    fn query_base(&self, endpoint: &EndpointInfo) -> String {
        match &endpoint.public_domain {
            Some(domain) => format!("https://{}/v1", domain),
            None => self.config.base_url.clone(),
        }
    }
}

#[async_trait]
impl VectorService for VertexVectorService {
    async fn list_indexes(&self, display_name: &str) -> Result<Vec<IndexInfo>, VectorServiceError> {
        let url = format!("{}/indexes", self.parent());
        let filter = format!("display_name=\"{}\"", display_name);
        let mut found = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("filter", filter.clone())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: ListIndexes = self.send(self.http().await?.get(&url).query(&query)).await?;
            found.extend(
                page.indexes
                    .into_iter()
                    .map(IndexInfo::from)
                    .filter(|i| i.display_name == display_name),
            );
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(found)
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<IndexInfo, VectorServiceError> {
        let url = format!("{}/indexes", self.parent());
        let body = json!({
            "displayName": spec.display_name,
            "indexUpdateMethod": "STREAM_UPDATE",
            "metadata": {
                "config": {
                    "dimensions": spec.dimensions,
                    "approximateNeighborsCount": spec.approximate_neighbors_count,
                    "distanceMeasureType": spec.distance_measure,
                    "algorithmConfig": {
                        "treeAhConfig": {
                            "leafNodeEmbeddingCount": spec.leaf_node_embedding_count,
                            "leafNodesToSearchPercent": spec.leaf_nodes_to_search_percent,
                        }
                    }
                }
            }
        });

        tracing::info!(display_name = %spec.display_name, dimensions = spec.dimensions, "Creating Vertex index");
        let operation: Operation = self.send(self.http().await?.post(&url).json(&body)).await?;
        let response = self.wait(operation).await?;
        let resource: IndexResource = serde_json::from_value(response)
            .map_err(|e| VectorServiceError::InvalidResponse(e.to_string()))?;

        let mut info = IndexInfo::from(resource);
        info.dimensions.get_or_insert(spec.dimensions);
        Ok(info)
    }

    async fn list_endpoints(
        &self,
        display_name: &str,
    ) -> Result<Vec<EndpointInfo>, VectorServiceError> {
        let url = format!("{}/indexEndpoints", self.parent());
        let filter = format!("display_name=\"{}\"", display_name);
        let mut found = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("filter", filter.clone())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: ListEndpoints = self.send(self.http().await?.get(&url).query(&query)).await?;
            found.extend(
                page.index_endpoints
                    .into_iter()
                    .map(EndpointInfo::from)
                    .filter(|e| e.display_name == display_name),
            );
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(found)
    }

    async fn create_endpoint(&self, display_name: &str) -> Result<EndpointInfo, VectorServiceError> {
        let url = format!("{}/indexEndpoints", self.parent());
        let body = json!({
            "displayName": display_name,
            "publicEndpointEnabled": true,
        });

        tracing::info!(display_name = %display_name, "Creating Vertex index endpoint");
        let operation: Operation = self.send(self.http().await?.post(&url).json(&body)).await?;
        let response = self.wait(operation).await?;
        let resource: EndpointResource = serde_json::from_value(response)
            .map_err(|e| VectorServiceError::InvalidResponse(e.to_string()))?;
        Ok(resource.into())
    }

    async fn get_endpoint(&self, name: &str) -> Result<EndpointInfo, VectorServiceError> {
        let url = self.resource_url(name);
        let resource: EndpointResource = self.send(self.http().await?.get(&url)).await?;
        Ok(resource.into())
    }

    async fn deploy_index(
        &self,
        endpoint: &EndpointInfo,
        index: &IndexInfo,
        deployed_index_id: &str,
    ) -> Result<(), VectorServiceError> {
        let url = format!("{}:deployIndex", self.resource_url(&endpoint.name));
        let body = json!({
            "deployedIndex": {
                "id": deployed_index_id,
                "index": index.name,
                "displayName": deployed_index_id,
            }
        });

        tracing::info!(endpoint = %endpoint.name, index = %index.name, deployed_index_id = %deployed_index_id, "Deploying index");
        let operation: Operation = self.send(self.http().await?.post(&url).json(&body)).await?;
        self.wait(operation).await?;
        Ok(())
    }

    async fn undeploy_index(
        &self,
        endpoint: &EndpointInfo,
        deployed_index_id: &str,
    ) -> Result<(), VectorServiceError> {
        let url = format!("{}:undeployIndex", self.resource_url(&endpoint.name));
        let body = json!({ "deployedIndexId": deployed_index_id });

        tracing::info!(endpoint = %endpoint.name, deployed_index_id = %deployed_index_id, "Undeploying index");
        let operation: Operation = self.send(self.http().await?.post(&url).json(&body)).await?;
        self.wait(operation).await?;
        Ok(())
    }

    async fn upsert_datapoints(
        &self,
        index: &IndexInfo,
        datapoints: &[IndexDatapoint],
    ) -> Result<(), VectorServiceError> {
        let url = format!("{}:upsertDatapoints", self.resource_url(&index.name));
        let wire: Vec<WireDatapoint<'_>> = datapoints
            .iter()
            .map(|d| WireDatapoint {
                datapoint_id: &d.id,
                feature_vector: &d.vector,
                restricts: to_wire(&d.restricts),
            })
            .collect();

        let _: serde_json::Value = self
            .send(self.http().await?.post(&url).json(&json!({ "datapoints": wire })))
            .await?;
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
        let url = format!("{}/{}:findNeighbors", self.query_base(endpoint), endpoint.name);
        let body = json!({
            "deployedIndexId": deployed_index_id,
            "queries": [{
                "datapoint": {
                    "datapointId": "query",
                    "featureVector": query,
                    "restricts": to_wire(restricts),
                },
                "neighborCount": top_k,
            }],
            "returnFullDatapoint": true,
        });

        let response: FindNeighborsResponse =
            self.send(self.http().await?.post(&url).json(&body)).await?;

        Ok(response
            .nearest_neighbors
            .into_iter()
            .next()
            .map(|n| n.neighbors)
            .unwrap_or_default()
            .into_iter()
            .map(|n| SearchHit {
                metadata: restricts_to_metadata(&from_wire(n.datapoint.restricts)),
                id: n.datapoint.datapoint_id,
                distance: n.distance,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "vertex"
    }
}
