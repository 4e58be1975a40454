//! Hybrid score fusion and the hit/no-hit decision.
//!
//! Dense and sparse results are merged over the union of candidate chunk
//! ids; a missing score counts as zero. Sparse scores are normalized into
//! 0..1 by the maximum sparse score in the current candidate set (all-zero
//! normalizes to zero, all-equal nonzero to one), then combined with the
//! configured weights. The decision flag alone tells callers whether the
//! results are usable; a `NoHit` outcome still carries the best-effort
//! candidates for diagnostics.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::chunker::MetadataFilter;
use crate::dense::{DenseIndex, RetrievalHit};
use crate::error::{EngineError, Result};
use crate::sparse::SparseIndex;

/// Whether the top fused score cleared the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Hit,
    NoHit,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Hit => f.write_str("hit"),
            Decision::NoHit => f.write_str("no_hit"),
        }
    }
}

/// Ranked fusion output. `topk` is populated even for `NoHit` so callers
/// can log what almost matched; only `decision` gates whether the content
/// may be shown.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub decision: Decision,
    pub topk: Vec<RetrievalHit>,
}

/// Merges dense and sparse result sets into one ranked, access-controlled
/// top-k with a threshold decision.
pub struct HybridRetriever {
    dense: Arc<dyn DenseIndex>,
    sparse: Arc<dyn SparseIndex>,
    dense_weight: f32,
    sparse_weight: f32,
    hit_threshold: f32,
}

impl HybridRetriever {
    pub fn new(
        dense: Arc<dyn DenseIndex>,
        sparse: Arc<dyn SparseIndex>,
        dense_weight: f32,
        sparse_weight: f32,
        hit_threshold: f32,
    ) -> Self {
        Self {
            dense,
            sparse,
            dense_weight,
            sparse_weight,
            hit_threshold,
        }
    }

    /// Runs both sub-queries with the same filter, fuses the candidate
    /// union, and truncates to `k`. Fails with a validation error for
    /// `k == 0`.
    pub fn retrieve(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<RetrievalOutcome> {
        if k == 0 {
            return Err(EngineError::Validation(
                "k must be positive".to_string(),
            ));
        }

        // Both sides apply the same filter before ranking, so excluded
        // content can never leak in through either path.
        let dense_hits = self
            .dense
            .query(query_embedding, k, filter)
            .map_err(|e| EngineError::Index(format!("dense query failed: {e}")))?;
        let sparse_hits = self
            .sparse
            .query(query_text, k, filter, None)
            .map_err(|e| EngineError::Index(format!("sparse query failed: {e}")))?;

        let mut candidates: HashMap<String, RetrievalHit> = dense_hits
            .into_iter()
            .map(|hit| (hit.chunk_id.clone(), hit))
            .collect();

        for (chunk_id, score) in sparse_hits {
            if let Some(hit) = candidates.get_mut(&chunk_id) {
                hit.score_sparse = score;
            } else if let Some(mut hit) = self.dense.lookup(&chunk_id)? {
                hit.score_sparse = score;
                candidates.insert(chunk_id, hit);
            }
            // A sparse hit with no dense entry means the chunk was removed
            // between the two sub-queries; drop it.
        }

        if candidates.is_empty() {
            return Ok(RetrievalOutcome {
                decision: Decision::NoHit,
                topk: Vec::new(),
            });
        }

        let max_sparse = candidates
            .values()
            .map(|hit| hit.score_sparse)
            .fold(0.0_f32, f32::max);

        let mut ranked: Vec<RetrievalHit> = candidates
            .into_values()
            .map(|mut hit| {
                let sparse_norm = if max_sparse > 0.0 {
                    hit.score_sparse / max_sparse
                } else {
                    0.0
                };
                hit.score_fused =
                    self.dense_weight * hit.score_vector + self.sparse_weight * sparse_norm;
                hit
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score_fused
                .partial_cmp(&a.score_fused)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        ranked.truncate(k);

        let decision = match ranked.first() {
            Some(top) if top.score_fused >= self.hit_threshold => Decision::Hit,
            _ => Decision::NoHit,
        };

        tracing::debug!(
            decision = %decision,
            candidates = ranked.len(),
            top_score = ranked.first().map(|h| h.score_fused).unwrap_or(0.0),
            "Hybrid retrieval complete"
        );

        Ok(RetrievalOutcome {
            decision,
            topk: ranked,
        })
    }
}
