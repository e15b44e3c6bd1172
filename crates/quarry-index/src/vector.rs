//! Tagged in-process vector store with exact and approximate search.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::hnsw::HnswGraph;
use crate::span::SpanId;

/// Store size at which queries switch from an exact scan to the HNSW
/// graph (with exact re-ranking of its candidates).
pub(crate) const ANN_THRESHOLD: usize = 1024;

/// Oversampling factor applied to `k` when collecting ANN candidates.
const ANN_EF_FACTOR: usize = 4;

/// A vector tagged with the provider version that produced it.
/// Vectors under different tags are never compared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub tag: String,
    pub vector: Vec<f32>,
}

/// Span vectors for one provider version, queried by cosine
/// similarity.
///
/// Mutations invalidate the HNSW graph; [`VectorStore::optimize`]
/// rebuilds it once a batch of changes is done. Until then queries
/// fall back to the exact scan, which is always correct, just slower.
pub struct VectorStore {
    tag: String,
    records: BTreeMap<SpanId, Vec<f32>>,
    ann: Option<HnswGraph>,
    /// Node index → span id mapping for the current graph.
    ann_ids: Vec<SpanId>,
}

impl VectorStore {
    #[must_use]
    pub fn new(tag: String) -> Self {
        Self {
            tag,
            records: BTreeMap::new(),
            ann: None,
            ann_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace the vector for a span.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ProviderMismatch`] if the embedding was
    /// produced under a different provider tag.
    pub fn upsert(&mut self, id: SpanId, embedding: Embedding) -> Result<()> {
        if embedding.tag != self.tag {
            return Err(IndexError::ProviderMismatch {
                store: self.tag.clone(),
                got: embedding.tag,
            });
        }
        self.records.insert(id, embedding.vector);
        self.invalidate();
        Ok(())
    }

    pub fn delete(&mut self, id: &SpanId) -> bool {
        let removed = self.records.remove(id).is_some();
        if removed {
            self.invalidate();
        }
        removed
    }

    /// Remove every vector owned by `file_path`. Returns the count.
    pub fn delete_file(&mut self, file_path: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|id, _| !id.owned_by(file_path));
        let removed = before - self.records.len();
        if removed > 0 {
            self.invalidate();
        }
        removed
    }

    fn invalidate(&mut self) {
        self.ann = None;
        self.ann_ids.clear();
    }

    /// Rebuild the ANN graph if the store is past the threshold.
    /// Cheap no-op below it or when the graph is already current.
    pub fn optimize(&mut self) {
        if self.records.len() < ANN_THRESHOLD {
            self.invalidate();
            return;
        }
        if self.ann.as_ref().is_some_and(|g| g.len() == self.records.len()) {
            return;
        }
        self.ann_ids = self.records.keys().cloned().collect();
        self.ann = HnswGraph::build(self.records.iter());
        tracing::debug!(points = self.records.len(), "ANN graph rebuilt");
    }

    /// K nearest spans by cosine similarity, score descending, span id
    /// ascending on ties. Empty store yields an empty result, not an
    /// error. Never returns an id that is not currently upserted.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ProviderMismatch`] for a query embedding
    /// from a different provider version.
    pub fn query(&self, embedding: &Embedding, k: usize) -> Result<Vec<(SpanId, f32)>> {
        if embedding.tag != self.tag {
            return Err(IndexError::ProviderMismatch {
                store: self.tag.clone(),
                got: embedding.tag.clone(),
            });
        }
        if k == 0 || self.records.is_empty() {
            return Ok(vec![]);
        }

        let mut scored: Vec<(SpanId, f32)> = match &self.ann {
            // Approximate candidate set, re-ranked exactly below.
            Some(graph) => graph
                .search(&embedding.vector, k.saturating_mul(ANN_EF_FACTOR).max(64))
                .into_iter()
                .filter_map(|idx| {
                    let id = self.ann_ids.get(idx as usize)?;
                    let vector = self.records.get(id)?;
                    Some((id.clone(), cosine(&embedding.vector, vector)))
                })
                .collect(),
            None => self
                .records
                .iter()
                .map(|(id, v)| (id.clone(), cosine(&embedding.vector, v)))
                .collect(),
        };

        scored.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Iterate records in span-id order, for persistence.
    pub(crate) fn records(&self) -> impl Iterator<Item = (&SpanId, &Vec<f32>)> {
        self.records.iter()
    }
}

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
