//! Error types for the hybrid retrieval engine.

use thiserror::Error;

/// Top-level error type for engine operations.
///
/// Lookup-style operations (`load`, `get_status`, `revert_to_version`)
/// return `Option`/`bool` for the "no data" case instead of an error;
/// `NotFound` is reserved for callers that require the target to exist.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid chunking or engine configuration (e.g. overlap >= chunk size).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid query parameters (e.g. k == 0).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown document or version.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying dense/sparse index failure. Surfaced, not retried.
    #[error("index error: {0}")]
    Index(String),

    /// Embedding backend failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Background task failed to join.
    #[error("task join error: {0}")]
    Join(String),

    /// I/O errors from the document store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors for persisted state.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
