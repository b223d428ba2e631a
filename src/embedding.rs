//! Embedding client abstraction and the Azure OpenAI implementation.
//!
//! - **[`Embedder`]** is the seam used by ingestion (batch embedding of
//!   chunk texts) and retrieval (embedding a single query).
//! - **[`AzureOpenAIEmbedder`]** calls an Azure OpenAI embeddings
//!   deployment over HTTPS.
//!
//! Also provides [`cosine_similarity`], used by maximal-marginal-relevance
//! selection.
//!
//! # Retry Strategy
//!
//! None. A failed request surfaces as [`RagError::Remote`]; the batch
//! uploader decides whether to try again.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::{AzureDeployment, Config};
use crate::error::{RagError, Result};

const SERVICE: &str = "embeddings";

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning one vector per input in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::remote(SERVICE, "empty embedding response"))
    }
}

/// Client for an Azure OpenAI embeddings deployment.
///
/// Inputs are sent in sub-batches of `embedding_batch_size` texts per
/// request; results are concatenated in input order.
pub struct AzureOpenAIEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    batch_size: usize,
}

impl AzureOpenAIEmbedder {
    pub fn new(deployment: AzureDeployment, batch_size: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::remote(SERVICE, e))?;
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            deployment.endpoint.trim_end_matches('/'),
            deployment.deployment,
            deployment.api_version
        );
        Ok(Self {
            client,
            url,
            api_key: deployment.api_key,
            batch_size: batch_size.max(1),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.embedding_deployment()?,
            config.embedding_batch_size,
            config.request_timeout(),
        )
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "input": texts });

        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::remote(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::remote(
                SERVICE,
                format!("HTTP {}: {}", status, body_text),
            ));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::remote(SERVICE, e))?;
        let vectors = parse_embeddings_response(&json)?;
        if vectors.len() != texts.len() {
            return Err(RagError::remote(
                SERVICE,
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for AzureOpenAIEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            tracing::debug!(texts = batch.len(), "embedding request");
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Parse an embeddings response body.
///
/// Extracts the `data[].embedding` arrays, ordered by each item's `index`
/// field (falling back to response order when absent).
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::remote(SERVICE, "invalid response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::remote(SERVICE, "invalid response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, and zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
