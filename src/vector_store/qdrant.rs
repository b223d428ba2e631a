//! Qdrant REST client.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create    | `PUT /collections/{name}` |
//! | upsert    | `PUT /collections/{name}/points?wait=true` |
//! | search    | `POST /collections/{name}/points/search` |
//!
//! Every request carries the `api-key` header. Payloads are stored as
//! `{ "page_content": ..., "metadata": {...} }`.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{CollectionSpec, Point, ScoredPoint, VectorStore};
use crate::config::{Config, QdrantConnection};
use crate::error::{RagError, Result};
use crate::models::Document;

const SERVICE: &str = "qdrant";

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    payload: Option<Document>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

impl QdrantStore {
    pub fn new(connection: QdrantConnection, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::remote(SERVICE, e))?;
        Ok(Self {
            client,
            base_url: connection.url.trim_end_matches('/').to_string(),
            api_key: connection.api_key,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.qdrant()?, config.request_timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        request
            .header("api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| RagError::remote(SERVICE, e))
    }
}

/// Request body for collection creation.
fn collection_body(spec: &CollectionSpec) -> serde_json::Value {
    let mut body = serde_json::json!({
        "vectors": {
            "size": spec.dimension,
            "distance": spec.distance.as_str(),
        },
        "on_disk_payload": spec.on_disk_payload,
    });
    if spec.binary_quantization {
        body["quantization_config"] = serde_json::json!({
            "binary": { "always_ram": false }
        });
    }
    body
}

fn points_body(points: &[Point]) -> Result<serde_json::Value> {
    let points = points
        .iter()
        .map(|p| {
            let payload = serde_json::to_value(&p.document)
                .map_err(|e| RagError::remote(SERVICE, e))?;
            Ok(serde_json::json!({
                "id": p.id,
                "vector": p.vector,
                "payload": payload,
            }))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(serde_json::json!({ "points": points }))
}

async fn error_for(response: reqwest::Response) -> RagError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    RagError::remote(SERVICE, format!("HTTP {}: {}", status, body))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let url = self.url(&format!("/collections/{}", spec.name));
        let response = self
            .send(self.client.put(&url).json(&collection_body(spec)))
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::CONFLICT {
            return Err(RagError::AlreadyExists(spec.name.clone()));
        }
        let body = response.text().await.unwrap_or_default();
        if body.contains("already exists") {
            return Err(RagError::AlreadyExists(spec.name.clone()));
        }
        Err(RagError::remote(SERVICE, format!("HTTP {}: {}", status, body)))
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let url = self.url(&format!("/collections/{}/points?wait=true", collection));
        let body = points_body(&points)?;
        drop(points);

        let response = self.send(self.client.put(&url).json(&body)).await?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let url = self.url(&format!("/collections/{}/points/search", collection));
        let body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });

        let response = self.send(self.client.post(&url).json(&body)).await?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RagError::remote(SERVICE, e))?;

        Ok(parsed
            .result
            .into_iter()
            .filter_map(|hit| {
                let document = hit.payload?;
                Some(ScoredPoint {
                    document,
                    vector: hit.vector.unwrap_or_default(),
                    score: hit.score,
                })
            })
            .collect())
    }
}
