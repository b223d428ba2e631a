//! In-memory [`VectorStore`] for tests and offline runs.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every stored vector.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{CollectionSpec, Point, ScoredPoint, VectorStore};
use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};

const SERVICE: &str = "memory store";

struct StoredCollection {
    spec: CollectionSpec,
    /// Insertion-ordered; an upsert with a known id replaces in place.
    points: Vec<Point>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, StoredCollection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map_or(0, |c| c.points.len())
    }

    pub fn spec(&self, collection: &str) -> Option<CollectionSpec> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map(|c| c.spec.clone())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if collections.contains_key(&spec.name) {
            return Err(RagError::AlreadyExists(spec.name.clone()));
        }
        collections.insert(
            spec.name.clone(),
            StoredCollection {
                spec: spec.clone(),
                points: Vec::new(),
            },
        );
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| RagError::remote(SERVICE, format!("collection `{}` not found", collection)))?;

        // Validate the whole batch before touching anything.
        let expected = stored.spec.dimension;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != expected) {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: bad.vector.len(),
            });
        }

        for point in points {
            match stored.points.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point,
                None => stored.points.push(point),
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let stored = collections
            .get(collection)
            .ok_or_else(|| RagError::remote(SERVICE, format!("collection `{}` not found", collection)))?;
        if vector.len() != stored.spec.dimension {
            return Err(RagError::DimensionMismatch {
                expected: stored.spec.dimension,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<ScoredPoint> = stored
            .points
            .iter()
            .map(|p| ScoredPoint {
                document: p.document.clone(),
                vector: p.vector.clone(),
                score: cosine_similarity(vector, &p.vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}
