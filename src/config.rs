//! Engine configuration with environment overrides.

use crate::error::{EngineError, Result};

const DEFAULT_CHUNK_SIZE: usize = 800;
const DEFAULT_CHUNK_OVERLAP: usize = 200;
const DEFAULT_DENSE_WEIGHT: f32 = 0.7;
const DEFAULT_SPARSE_WEIGHT: f32 = 0.3;
const DEFAULT_HIT_THRESHOLD: f32 = 0.35;
const DEFAULT_REINDEX_WORKERS: usize = 1;

/// Configuration for chunking, score fusion, and reindex workers.
///
/// Weights are not required to sum to 1; the hit threshold is compared
/// against the top fused score after weighting.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chunk window length, in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, in characters. Must be < `chunk_size`.
    pub chunk_overlap: usize,
    /// Weight applied to the dense (vector) similarity score.
    pub dense_weight: f32,
    /// Weight applied to the normalized sparse (lexical) score.
    pub sparse_weight: f32,
    /// Minimum top fused score for a query to count as a hit.
    pub hit_threshold: f32,
    /// Concurrent reindex worker slots.
    pub reindex_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            dense_weight: DEFAULT_DENSE_WEIGHT,
            sparse_weight: DEFAULT_SPARSE_WEIGHT,
            hit_threshold: DEFAULT_HIT_THRESHOLD,
            reindex_workers: DEFAULT_REINDEX_WORKERS,
        }
    }
}

impl EngineConfig {
    /// Builds a config from environment variables, falling back to defaults
    /// for unset or invalid values.
    ///
    /// Recognized variables: `RAG_CHUNK_SIZE`, `RAG_CHUNK_OVERLAP`,
    /// `RAG_DENSE_WEIGHT`, `RAG_SPARSE_WEIGHT`, `RAG_HIT_THRESHOLD`,
    /// `RAG_REINDEX_WORKERS`.
    pub fn from_env() -> Self {
        Self {
            chunk_size: parse_count("RAG_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            chunk_overlap: parse_count("RAG_CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP),
            dense_weight: parse_weight("RAG_DENSE_WEIGHT", DEFAULT_DENSE_WEIGHT),
            sparse_weight: parse_weight("RAG_SPARSE_WEIGHT", DEFAULT_SPARSE_WEIGHT),
            hit_threshold: parse_weight("RAG_HIT_THRESHOLD", DEFAULT_HIT_THRESHOLD),
            reindex_workers: parse_count("RAG_REINDEX_WORKERS", DEFAULT_REINDEX_WORKERS).max(1),
        }
    }

    /// Checks the chunking parameters. The window must advance on every step,
    /// so the overlap has to be strictly smaller than the chunk size.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(EngineError::Configuration(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(EngineError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.reindex_workers == 0 {
            return Err(EngineError::Configuration(
                "reindex_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a weight from an environment variable, keeping only finite
/// non-negative values.
fn parse_weight(env_var: &str, default: f32) -> f32 {
    std::env::var(env_var)
        .ok()
        .and_then(|s| s.parse::<f32>().ok())
        .filter(|w| w.is_finite() && *w >= 0.0)
        .unwrap_or(default)
}

/// Parse a positive count from an environment variable.
fn parse_count(env_var: &str, default: usize) -> usize {
    std::env::var(env_var)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}
