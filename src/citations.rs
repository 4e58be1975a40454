//! Substring-based citation mapping.
//!
//! A retrieved chunk is considered cited when the answer text contains
//! either the chunk's leading snippet or its document title verbatim.
//! Deliberately simple; fuzzy or semantic attribution is out of scope.

use serde::Serialize;

use crate::dense::RetrievalHit;

/// Snippet length, in characters, used for the verbatim match.
const SNIPPET_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
}

/// Returns one citation per cited hit, preserving the input ranking order.
/// Chunks whose text and title both miss the answer are omitted.
pub fn map_citations(answer_text: &str, hits: &[RetrievalHit]) -> Vec<Citation> {
    hits.iter()
        .filter(|hit| is_cited(answer_text, hit))
        .map(|hit| Citation {
            chunk_id: hit.chunk_id.clone(),
            doc_id: hit.doc_id.clone(),
            title: hit.metadata.title.clone(),
        })
        .collect()
}

fn is_cited(answer_text: &str, hit: &RetrievalHit) -> bool {
    let snippet = leading_chars(&hit.document_text, SNIPPET_CHARS);
    if !snippet.is_empty() && answer_text.contains(snippet) {
        return true;
    }
    let title = hit.metadata.title.as_str();
    !title.is_empty() && answer_text.contains(title)
}

/// First `n` characters of `text`, sliced on a char boundary.
fn leading_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
