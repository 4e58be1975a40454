//! Dense (vector) retrieval over chunk embeddings.
//!
//! Entries are normalized on insert so similarity is a plain dot product.
//! Filtering happens before ranking: entries excluded by the metadata
//! filter never appear in results and never affect scores.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::chunker::{ChunkMetadata, MetadataFilter};
use crate::error::Result;

/// One indexed chunk: embedding plus the text and metadata needed to build
/// retrieval hits. Replaced wholesale when its chunk is re-ingested.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    pub document_text: String,
    pub metadata: ChunkMetadata,
}

/// A scored retrieval candidate. Ephemeral, produced per query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub document_text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity clamped to 0..1, higher is better.
    pub score_vector: f32,
    /// Raw lexical score, unbounded non-negative.
    pub score_sparse: f32,
    /// Weighted combination, filled in by fusion.
    pub score_fused: f32,
}

/// Vector index capability: upsert embeddings, answer filtered
/// nearest-neighbor queries.
pub trait DenseIndex: Send + Sync {
    /// Upserts by `chunk_id`; re-adding with the same id replaces prior
    /// content, which is what makes re-ingestion safe.
    fn add_chunks(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Returns up to `k` hits sorted by `score_vector` descending, ties
    /// broken by chunk id. `filter` is applied before ranking.
    fn query(&self, embedding: &[f32], k: usize, filter: &MetadataFilter)
        -> Result<Vec<RetrievalHit>>;

    /// Fetches a single entry as an unscored hit, for hydrating sparse-only
    /// fusion candidates.
    fn lookup(&self, chunk_id: &str) -> Result<Option<RetrievalHit>>;

    /// Removes every chunk belonging to `doc_id`; returns how many were removed.
    fn remove_doc(&self, doc_id: &str) -> Result<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory reference implementation: brute-force cosine over a hash map.
/// Fine for small corpora and doubles as the test index. The map-wide write
/// lock makes each upsert atomic per chunk id; readers see old or new
/// content, never a torn entry.
#[derive(Default)]
pub struct InMemoryDenseIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl InMemoryDenseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn hit_from(entry: &IndexEntry, score_vector: f32) -> RetrievalHit {
        RetrievalHit {
            chunk_id: entry.chunk_id.clone(),
            doc_id: entry.metadata.doc_id.clone(),
            document_text: entry.document_text.clone(),
            metadata: entry.metadata.clone(),
            score_vector,
            score_sparse: 0.0,
            score_fused: 0.0,
        }
    }
}

impl DenseIndex for InMemoryDenseIndex {
    fn add_chunks(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for mut entry in entries {
            normalize(&mut entry.embedding);
            map.insert(entry.chunk_id.clone(), entry);
        }
        Ok(())
    }

    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievalHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut query = embedding.to_vec();
        normalize(&mut query);

        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<RetrievalHit> = map
            .values()
            .filter(|entry| filter.matches(&entry.metadata))
            .map(|entry| {
                let score = dot_product(&query, &entry.embedding).clamp(0.0, 1.0);
                Self::hit_from(entry, score)
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score_vector
                .partial_cmp(&a.score_vector)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn lookup(&self, chunk_id: &str) -> Result<Option<RetrievalHit>> {
        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(chunk_id).map(|entry| Self::hit_from(entry, 0.0)))
    }

    fn remove_doc(&self, doc_id: &str) -> Result<usize> {
        let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, entry| entry.metadata.doc_id != doc_id);
        Ok(before - map.len())
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Normalize a vector to unit length in place. Near-zero vectors are left
/// unchanged.
pub(crate) fn normalize(v: &mut [f32]) {
    let norm_sq: f32 = v.iter().map(|x| x * x).sum();
    if norm_sq > 1e-20 {
        let norm = norm_sq.sqrt();
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product over the common prefix of both vectors. Equals cosine
/// similarity when both are normalized.
#[inline(always)]
pub(crate) fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
