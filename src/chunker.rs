//! Deterministic sliding-window chunking.
//!
//! Chunk boundaries depend only on `(text, chunk_size, chunk_overlap)`, so
//! re-chunking identical input always yields identical chunk ids and offsets.
//! That determinism is what makes re-ingestion idempotent: the chunk id
//! `"{doc_id}:{index}"` is stable, and index upserts replace prior content.

use serde::{Deserialize, Serialize};

use crate::doc_store::{AccessScope, Document};
use crate::error::{EngineError, Result};

/// Metadata carried by every indexed chunk.
///
/// Offsets are measured in characters from the start of the document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub start_offset: usize,
    pub end_offset: usize,
    pub doc_id: String,
    pub title: String,
    pub access_scope: AccessScope,
    pub version: String,
}

/// A fixed-size, offset-addressable slice of a document's text. The unit of
/// indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id: `"{doc_id}:{sequence_index}"`.
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Exact-match predicate over chunk metadata, applied by both indexes
/// before ranking. Excluded entries never appear in results and never
/// influence score normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    pub access_scope: Option<AccessScope>,
    pub doc_id: Option<String>,
}

impl MetadataFilter {
    /// Filter on access scope only. `None` means all scopes are visible
    /// (trusted internal callers).
    pub fn scope(access_scope: Option<AccessScope>) -> Self {
        Self {
            access_scope,
            doc_id: None,
        }
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(scope) = &self.access_scope {
            if &metadata.access_scope != scope {
                return false;
            }
        }
        if let Some(doc_id) = &self.doc_id {
            if &metadata.doc_id != doc_id {
                return false;
            }
        }
        true
    }
}

/// A raw window produced by [`chunk`], before document metadata is stamped on.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub chunk_id: String,
    pub doc_id: String,
    pub index: usize,
    /// Start offset in characters.
    pub start: usize,
    /// End offset in characters (exclusive).
    pub end: usize,
    pub text: String,
}

/// Splits `text` into overlapping windows of `chunk_size` characters.
///
/// The window advances by `chunk_size - chunk_overlap` each step and one
/// chunk is emitted per step offset inside the text, so trailing text always
/// ends up in a final (possibly partial) window. Empty text yields zero
/// chunks; text of at most `chunk_size` characters yields exactly one chunk
/// spanning the whole text.
pub fn chunk(
    doc_id: &str,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<ChunkSpan>> {
    if chunk_size == 0 {
        return Err(EngineError::Configuration(
            "chunk_size must be positive".to_string(),
        ));
    }
    if chunk_overlap >= chunk_size {
        return Err(EngineError::Configuration(format!(
            "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
        )));
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every character, so windows never split a UTF-8 sequence.
    let char_starts: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let total_chars = char_starts.len();
    let step = chunk_size - chunk_overlap;

    // Text that fits in one window is exactly one chunk; no tail windows
    // re-covering text the first window already holds.
    if total_chars <= chunk_size {
        return Ok(vec![ChunkSpan {
            chunk_id: format!("{doc_id}:0"),
            doc_id: doc_id.to_string(),
            index: 0,
            start: 0,
            end: total_chars,
            text: text.to_string(),
        }]);
    }

    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    // One window per step offset inside the text; the last one may be a
    // partial window covering the trailing characters.
    while start < total_chars {
        let end = (start + chunk_size).min(total_chars);
        let byte_start = char_starts[start];
        let byte_end = if end == total_chars {
            text.len()
        } else {
            char_starts[end]
        };

        spans.push(ChunkSpan {
            chunk_id: format!("{doc_id}:{index}"),
            doc_id: doc_id.to_string(),
            index,
            start,
            end,
            text: text[byte_start..byte_end].to_string(),
        });

        start += step;
        index += 1;
    }

    Ok(spans)
}

/// Chunks a document and stamps document-level metadata (title, scope,
/// version) onto each chunk.
pub fn chunk_document(doc: &Document, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<Chunk>> {
    let spans = chunk(&doc.doc_id, &doc.text, chunk_size, chunk_overlap)?;
    tracing::debug!(
        doc_id = %doc.doc_id,
        chunks = spans.len(),
        "Chunked document"
    );

    Ok(spans
        .into_iter()
        .map(|span| Chunk {
            chunk_id: span.chunk_id,
            doc_id: span.doc_id,
            text: span.text,
            metadata: ChunkMetadata {
                start_offset: span.start,
                end_offset: span.end,
                doc_id: doc.doc_id.clone(),
                title: doc.title.clone(),
                access_scope: doc.access_scope.clone(),
                version: doc.version.clone(),
            },
        })
        .collect())
}
