//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers the three remote operations the
//! pipeline needs: provisioning a collection, upserting points and nearest
//! neighbour search. [`CollectionHandle`] binds a store, an embedder and a
//! collection name into the object ingestion writes through and retrieval
//! reads from.
//!
//! ```text
//!   Document ──embed──▶ Point { id, vector, payload } ──upsert──▶ collection
//!   query    ──embed──▶ search(fetch_k, with vectors) ──MMR(k, λ)──▶ Documents
//! ```
//!
//! Implementations:
//! - [`qdrant::QdrantStore`]: Qdrant REST API.
//! - [`memory::InMemoryVectorStore`]: brute-force, for tests and dry runs.

pub mod memory;
pub mod qdrant;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{RagError, Result};
use crate::models::Document;
use crate::upload::DocumentSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Cosine,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
        }
    }
}

/// Everything needed to provision a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    pub distance: Distance,
    /// Store a 1-bit quantized copy of each vector for fast search.
    pub binary_quantization: bool,
    pub on_disk_payload: bool,
}

impl CollectionSpec {
    /// Cosine distance, binary quantization, payload on disk.
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            distance: Distance::Cosine,
            binary_quantization: true,
            on_disk_payload: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    Created,
    AlreadyExists,
}

/// A stored record: a chunk, its embedding and a stable id.
#[derive(Debug, Clone)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub document: Document,
}

/// A search hit with the stored vector attached.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub document: Document,
    pub vector: Vec<f32>,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection. Fails with [`RagError::AlreadyExists`] when a
    /// collection of that name is already present.
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()>;

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()>;

    /// Up to `limit` nearest points, best first, with vectors.
    async fn search(&self, collection: &str, vector: &[f32], limit: usize)
        -> Result<Vec<ScoredPoint>>;
}

/// Provision `spec`, treating an existing collection as success.
pub async fn create_or_verify_collection(
    store: &dyn VectorStore,
    spec: &CollectionSpec,
) -> Result<CollectionStatus> {
    match store.create_collection(spec).await {
        Ok(()) => {
            tracing::info!(collection = %spec.name, dimension = spec.dimension, "collection created");
            Ok(CollectionStatus::Created)
        }
        Err(RagError::AlreadyExists(_)) => {
            tracing::info!(collection = %spec.name, "collection already exists");
            Ok(CollectionStatus::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

/// Deterministic point id for a chunk.
///
/// Derived from the chunk's source, page, position and text, so re-ingesting
/// the same PDF overwrites points instead of duplicating them.
pub fn point_id(document: &Document) -> String {
    let mut hasher = Sha256::new();
    for key in ["source", "page", "chunk_index"] {
        if let Some(value) = document.meta(key) {
            hasher.update(value.to_string().as_bytes());
        }
        hasher.update([0u8]);
    }
    hasher.update(document.content.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

/// A named collection plus the clients needed to write and query it.
#[derive(Clone)]
pub struct CollectionHandle {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    collection: String,
}

impl CollectionHandle {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embed and upsert `documents`; returns the number stored.
    pub async fn add_documents(&self, documents: &[Document]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != documents.len() {
            return Err(RagError::remote(
                "embeddings",
                format!("expected {} vectors, got {}", documents.len(), vectors.len()),
            ));
        }

        let points: Vec<Point> = documents
            .iter()
            .zip(vectors)
            .map(|(doc, vector)| Point {
                id: point_id(doc),
                vector,
                document: doc.clone(),
            })
            .collect();
        let count = points.len();
        self.store.upsert(&self.collection, points).await?;
        Ok(count)
    }

    /// Fetch `fetch_k` neighbours of `query`, then pick `k` of them by
    /// maximal marginal relevance.
    pub async fn max_marginal_relevance_search(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        lambda: f32,
    ) -> Result<Vec<Document>> {
        let vector = self.embedder.embed_query(query).await?;
        let hits = self
            .store
            .search(&self.collection, &vector, fetch_k.max(k))
            .await?;
        let candidates: Vec<Vec<f32>> = hits.iter().map(|h| h.vector.clone()).collect();
        let picked = maximal_marginal_relevance(&vector, &candidates, k, lambda);
        tracing::debug!(fetched = hits.len(), selected = picked.len(), "mmr search");

        let mut hits: Vec<Option<ScoredPoint>> = hits.into_iter().map(Some).collect();
        Ok(picked
            .into_iter()
            .filter_map(|i| hits[i].take().map(|h| h.document))
            .collect())
    }
}

#[async_trait]
impl DocumentSink for CollectionHandle {
    async fn add_documents(&self, documents: &[Document]) -> Result<()> {
        CollectionHandle::add_documents(self, documents).await.map(|_| ())
    }
}

/// Greedy maximal-marginal-relevance selection.
///
/// Starts from the candidate most similar to `query`, then repeatedly adds
/// the candidate maximising
/// `λ · sim(query, c) − (1 − λ) · max sim(c, selected)`.
/// Returns indices into `candidates` in selection order.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[Vec<f32>],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    let k = k.min(candidates.len());
    if k == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    // Highest similarity to any selected candidate, per candidate.
    let mut redundancy = vec![f32::NEG_INFINITY; candidates.len()];

    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;
        for (i, rel) in relevance.iter().enumerate() {
            if selected.contains(&i) {
                continue;
            }
            let score = if selected.is_empty() {
                *rel
            } else {
                lambda * rel - (1.0 - lambda) * redundancy[i]
            };
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }
        let Some((pick, _)) = best else { break };
        selected.push(pick);
        for (i, candidate) in candidates.iter().enumerate() {
            let sim = cosine_similarity(candidate, &candidates[pick]);
            if sim > redundancy[i] {
                redundancy[i] = sim;
            }
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmr_first_pick_is_most_relevant() {
        let query = vec![1.0, 0.0];
        let candidates = vec![vec![0.0, 1.0], vec![1.0, 0.05], vec![0.7, 0.7]];
        let picked = maximal_marginal_relevance(&query, &candidates, 1, 0.5);
        assert_eq!(picked, vec![1]);
    }

    #[test]
    fn mmr_skips_near_duplicates() {
        let query = vec![1.0, 0.0, 0.0];
        let candidates = vec![
            vec![1.0, 0.1, 0.0],
            vec![1.0, 0.12, 0.0],
            vec![0.8, -0.1, 0.6],
        ];
        let picked = maximal_marginal_relevance(&query, &candidates, 2, 0.5);
        assert_eq!(picked, vec![0, 2]);

        // Pure relevance keeps the duplicate.
        let picked = maximal_marginal_relevance(&query, &candidates, 2, 1.0);
        assert_eq!(picked, vec![0, 1]);
    }

    #[test]
    fn mmr_k_larger_than_candidates() {
        let picked = maximal_marginal_relevance(&[1.0], &[vec![1.0], vec![0.5]], 5, 0.5);
        assert_eq!(picked.len(), 2);
        assert!(maximal_marginal_relevance(&[1.0], &[], 3, 0.5).is_empty());
    }

    #[test]
    fn point_ids_are_stable_uuids() {
        let doc = Document::new("text")
            .with_metadata("source", "a.pdf")
            .with_metadata("page", 2usize)
            .with_metadata("chunk_index", 0usize);
        let id = point_id(&doc);
        assert_eq!(id, point_id(&doc.clone()));
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let other = doc.clone().with_metadata("chunk_index", 1usize);
        assert_ne!(id, point_id(&other));
    }

    #[test]
    fn collection_spec_defaults() {
        let spec = CollectionSpec::new("docs", 3072);
        assert_eq!(spec.distance, Distance::Cosine);
        assert!(spec.binary_quantization);
        assert!(spec.on_disk_payload);
    }
}
