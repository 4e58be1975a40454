//! Sparse (lexical) retrieval over term-frequency postings.
//!
//! Chunk text is tokenized into lower-cased terms and stored per chunk id;
//! queries are scored by summed term-frequency overlap. Postings structure
//! follows the usual inverted layout but scoring stays a plain TF sum.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::chunker::{Chunk, MetadataFilter};
use crate::doc_store::AccessScope;
use crate::error::Result;

/// Lexical index capability: upsert chunk text, score queries by term
/// overlap, with optional metadata and explicit-id restriction.
pub trait SparseIndex: Send + Sync {
    /// Upserts by `chunk_id`: re-adding a chunk replaces its prior postings.
    fn add_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Scores `query_text` against indexed chunks and returns up to `k`
    /// `(chunk_id, score)` pairs, best first, ties broken by chunk id.
    /// `filter` excludes candidates before ranking; `filter_ids`, when
    /// given, restricts candidates to that id set.
    fn query(
        &self,
        query_text: &str,
        k: usize,
        filter: &MetadataFilter,
        filter_ids: Option<&HashSet<String>>,
    ) -> Result<Vec<(String, f32)>>;

    /// Removes every chunk belonging to `doc_id`; returns how many were removed.
    fn remove_doc(&self, doc_id: &str) -> Result<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct SparseEntry {
    doc_id: String,
    access_scope: AccessScope,
    term_frequencies: HashMap<String, usize>,
}

/// In-memory reference implementation, suitable for small corpora and as
/// the test double. Upserts replace the whole entry under the write lock,
/// so a concurrent reader sees either the old or new postings, never a mix.
#[derive(Default)]
pub struct InMemorySparseIndex {
    entries: RwLock<HashMap<String, SparseEntry>>,
}

impl InMemorySparseIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SparseIndex for InMemorySparseIndex {
    fn add_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for chunk in chunks {
            let mut term_frequencies: HashMap<String, usize> = HashMap::new();
            for token in tokenize(&chunk.text) {
                *term_frequencies.entry(token).or_insert(0) += 1;
            }
            entries.insert(
                chunk.chunk_id.clone(),
                SparseEntry {
                    doc_id: chunk.doc_id.clone(),
                    access_scope: chunk.metadata.access_scope.clone(),
                    term_frequencies,
                },
            );
        }
        Ok(())
    }

    fn query(
        &self,
        query_text: &str,
        k: usize,
        filter: &MetadataFilter,
        filter_ids: Option<&HashSet<String>>,
    ) -> Result<Vec<(String, f32)>> {
        let query_terms: HashSet<String> = tokenize(query_text).into_iter().collect();
        if query_terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut scored: Vec<(String, f32)> = Vec::new();

        for (chunk_id, entry) in entries.iter() {
            if let Some(ids) = filter_ids {
                if !ids.contains(chunk_id) {
                    continue;
                }
            }
            if let Some(scope) = &filter.access_scope {
                if &entry.access_scope != scope {
                    continue;
                }
            }
            if let Some(doc_id) = &filter.doc_id {
                if &entry.doc_id != doc_id {
                    continue;
                }
            }

            let score: usize = query_terms
                .iter()
                .filter_map(|term| entry.term_frequencies.get(term))
                .sum();
            if score > 0 {
                scored.push((chunk_id.clone(), score as f32));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    fn remove_doc(&self, doc_id: &str) -> Result<usize> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.doc_id != doc_id);
        Ok(before - entries.len())
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Tokenizes text into lower-cased alphanumeric terms. Single-character
/// fragments are dropped as noise.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 2)
        .map(|token| token.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkMetadata;

    fn chunk(chunk_id: &str, doc_id: &str, text: &str, scope: AccessScope) -> Chunk {
        Chunk {
            chunk_id: chunk_id.to_string(),
            doc_id: doc_id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                start_offset: 0,
                end_offset: text.chars().count(),
                doc_id: doc_id.to_string(),
                title: String::new(),
                access_scope: scope,
                version: "v1".to_string(),
            },
        }
    }

    #[test]
    fn scores_by_term_frequency_overlap() {
        let index = InMemorySparseIndex::new();
        index
            .add_chunks(&[
                chunk("a:0", "a", "rust engine rust index", AccessScope::Public),
                chunk("b:0", "b", "rust once", AccessScope::Public),
                chunk("c:0", "c", "nothing relevant here", AccessScope::Public),
            ])
            .unwrap();

        let hits = index
            .query("rust index", 10, &MetadataFilter::default(), None)
            .unwrap();
        assert_eq!(hits.len(), 2);
        // a:0 has tf(rust)=2 + tf(index)=1 = 3, b:0 has 1.
        assert_eq!(hits[0].0, "a:0");
        assert_eq!(hits[0].1, 3.0);
        assert_eq!(hits[1].0, "b:0");
        assert_eq!(hits[1].1, 1.0);
    }

    #[test]
    fn upsert_replaces_prior_postings() {
        let index = InMemorySparseIndex::new();
        index
            .add_chunks(&[chunk("a:0", "a", "old terms", AccessScope::Public)])
            .unwrap();
        index
            .add_chunks(&[chunk("a:0", "a", "fresh words", AccessScope::Public)])
            .unwrap();

        assert_eq!(index.len(), 1);
        let old = index
            .query("old terms", 10, &MetadataFilter::default(), None)
            .unwrap();
        assert!(old.is_empty());
        let fresh = index
            .query("fresh", 10, &MetadataFilter::default(), None)
            .unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn filter_ids_restricts_candidates() {
        let index = InMemorySparseIndex::new();
        index
            .add_chunks(&[
                chunk("a:0", "a", "shared term", AccessScope::Public),
                chunk("b:0", "b", "shared term", AccessScope::Public),
            ])
            .unwrap();

        let only_b: HashSet<String> = ["b:0".to_string()].into_iter().collect();
        let hits = index
            .query("shared", 10, &MetadataFilter::default(), Some(&only_b))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "b:0");
    }

    #[test]
    fn scope_filter_excludes_before_ranking() {
        let index = InMemorySparseIndex::new();
        index
            .add_chunks(&[
                chunk("pub:0", "pub", "token token token", AccessScope::Public),
                chunk("priv:0", "priv", "token token token token", AccessScope::Private),
            ])
            .unwrap();

        let hits = index
            .query(
                "token",
                10,
                &MetadataFilter::scope(Some(AccessScope::Public)),
                None,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "pub:0");
    }

    #[test]
    fn ties_break_by_chunk_id() {
        let index = InMemorySparseIndex::new();
        index
            .add_chunks(&[
                chunk("z:0", "z", "same words", AccessScope::Public),
                chunk("a:0", "a", "same words", AccessScope::Public),
            ])
            .unwrap();

        let hits = index
            .query("same words", 10, &MetadataFilter::default(), None)
            .unwrap();
        assert_eq!(hits[0].0, "a:0");
        assert_eq!(hits[1].0, "z:0");
    }

    #[test]
    fn remove_doc_drops_all_its_chunks() {
        let index = InMemorySparseIndex::new();
        index
            .add_chunks(&[
                chunk("a:0", "a", "alpha", AccessScope::Public),
                chunk("a:1", "a", "alpha beta", AccessScope::Public),
                chunk("b:0", "b", "gamma", AccessScope::Public),
            ])
            .unwrap();

        assert_eq!(index.remove_doc("a").unwrap(), 2);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn tokenize_lowercases_and_splits_punctuation() {
        assert_eq!(
            tokenize("SECRET_PHRASE, obviously!"),
            vec!["secret", "phrase", "obviously"]
        );
        assert!(tokenize("a . ; !").is_empty());
    }
}
