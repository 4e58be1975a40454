//! Ingestion and query orchestration.
//!
//! The engine owns the document store, both indexes, the embedder, and
//! the reindex job manager, and keeps index contents consistent with the
//! store. Cloning is cheap; all state is behind `Arc`.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use walkdir::WalkDir;

use crate::chunker::{self, MetadataFilter};
use crate::citations::{map_citations, Citation};
use crate::config::EngineConfig;
use crate::dense::{DenseIndex, IndexEntry, RetrievalHit};
use crate::doc_store::{AccessScope, Document, DocumentStore};
use crate::embedder::Embedder;
use crate::error::{EngineError, Result};
use crate::fusion::{Decision, HybridRetriever};
use crate::jobs::{JobRecord, ReindexJobManager, ReindexReport};
use crate::sparse::SparseIndex;

/// Per-document ingestion outcome. Chunks whose embedding fails are
/// counted rather than silently dropped.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub doc_id: String,
    pub version: String,
    pub indexed_chunks: usize,
    pub failed_chunks: usize,
    /// True when the text was identical to the currently indexed version
    /// and indexing was skipped.
    pub skipped_unchanged: bool,
}

/// Query result as returned to callers: the decision flag, the ranked
/// hits, and wall-clock latency.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResponse {
    pub decision: Decision,
    pub topk: Vec<RetrievalHit>,
    pub elapsed_ms: u64,
}

/// Summary of a directory ingestion. Individual file failures do not
/// abort the walk.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirIngestReport {
    pub ingested: Vec<IngestReport>,
    pub failed: Vec<(PathBuf, String)>,
}

#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    dense: Arc<dyn DenseIndex>,
    sparse: Arc<dyn SparseIndex>,
    jobs: Arc<ReindexJobManager>,
    retriever: Arc<HybridRetriever>,
    /// Content hash of the currently indexed text per doc, for change
    /// detection on re-ingestion.
    doc_hashes: Arc<RwLock<HashMap<String, String>>>,
}

impl Engine {
    /// `jobs` is owned by the composition root and shared across every
    /// engine clone, mirroring the process-wide worker pool.
    pub fn new(
        config: EngineConfig,
        store: Arc<DocumentStore>,
        embedder: Arc<dyn Embedder>,
        dense: Arc<dyn DenseIndex>,
        sparse: Arc<dyn SparseIndex>,
        jobs: Arc<ReindexJobManager>,
    ) -> Result<Self> {
        config.validate()?;
        let retriever = Arc::new(HybridRetriever::new(
            Arc::clone(&dense),
            Arc::clone(&sparse),
            config.dense_weight,
            config.sparse_weight,
            config.hit_threshold,
        ));
        Ok(Self {
            config: Arc::new(config),
            store,
            embedder,
            dense,
            sparse,
            jobs,
            retriever,
            doc_hashes: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Saves the document as a new version and (re)indexes its chunks.
    /// Unchanged text still gets a version entry but skips the index
    /// rebuild.
    pub async fn ingest(&self, mut doc: Document) -> Result<IngestReport> {
        if doc.doc_id.trim().is_empty() {
            return Err(EngineError::Validation("doc_id must not be empty".to_string()));
        }

        let version = self.store.save(&doc).await?;
        doc.version = version.clone();

        let text_hash = content_hash(&doc.text);
        let unchanged = {
            let hashes = self.doc_hashes.read().unwrap_or_else(|e| e.into_inner());
            hashes.get(&doc.doc_id) == Some(&text_hash)
        };
        if unchanged {
            tracing::info!(doc_id = %doc.doc_id, %version, "Document unchanged, skipping reindex");
            return Ok(IngestReport {
                doc_id: doc.doc_id,
                version,
                indexed_chunks: 0,
                failed_chunks: 0,
                skipped_unchanged: true,
            });
        }

        let (indexed, failed) = self.index_document(&doc).await?;
        {
            let mut hashes = self.doc_hashes.write().unwrap_or_else(|e| e.into_inner());
            hashes.insert(doc.doc_id.clone(), text_hash);
        }

        tracing::info!(
            doc_id = %doc.doc_id,
            %version,
            indexed_chunks = indexed,
            failed_chunks = failed,
            "Document ingested"
        );
        Ok(IngestReport {
            doc_id: doc.doc_id,
            version,
            indexed_chunks: indexed,
            failed_chunks: failed,
            skipped_unchanged: false,
        })
    }

    /// Chunks, embeds, and indexes one document, replacing whatever the
    /// indexes held for it. Returns (indexed, failed) chunk counts.
    async fn index_document(&self, doc: &Document) -> Result<(usize, usize)> {
        let chunks =
            chunker::chunk_document(doc, self.config.chunk_size, self.config.chunk_overlap)?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut entries = Vec::with_capacity(chunks.len());
        let mut kept_chunks = Vec::with_capacity(chunks.len());
        let mut failed = 0usize;

        match self.embedder.embed_batch(&texts).await {
            Ok(embeddings) => {
                if embeddings.len() != chunks.len() {
                    return Err(EngineError::Embedding(format!(
                        "embedder returned {} vectors for {} chunks",
                        embeddings.len(),
                        chunks.len()
                    )));
                }
                for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
                    entries.push(IndexEntry {
                        chunk_id: chunk.chunk_id.clone(),
                        embedding,
                        document_text: chunk.text.clone(),
                        metadata: chunk.metadata.clone(),
                    });
                    kept_chunks.push(chunk);
                }
            }
            Err(batch_err) => {
                // Batch path failed; retry chunk by chunk so one bad chunk
                // does not lose the whole document.
                tracing::warn!(doc_id = %doc.doc_id, error = %batch_err, "Batch embedding failed, retrying per chunk");
                for chunk in chunks {
                    match self.embedder.embed_text(&chunk.text).await {
                        Ok(embedding) => {
                            entries.push(IndexEntry {
                                chunk_id: chunk.chunk_id.clone(),
                                embedding,
                                document_text: chunk.text.clone(),
                                metadata: chunk.metadata.clone(),
                            });
                            kept_chunks.push(chunk);
                        }
                        Err(e) => {
                            tracing::warn!(chunk_id = %chunk.chunk_id, error = %e, "Skipping chunk, embedding failed");
                            failed += 1;
                        }
                    }
                }
            }
        }

        // Drop stale chunks first, then insert the new set. Re-ingestion
        // with fewer chunks must not leave orphans behind.
        self.dense.remove_doc(&doc.doc_id)?;
        self.sparse.remove_doc(&doc.doc_id)?;
        let indexed = entries.len();
        self.dense.add_chunks(entries)?;
        self.sparse.add_chunks(&kept_chunks)?;
        Ok((indexed, failed))
    }

    /// Removes a document from the store and both indexes. Returns false
    /// when the document was never stored.
    pub async fn delete_document(&self, doc_id: &str) -> Result<bool> {
        let existed = self.store.delete(doc_id).await?;
        self.dense.remove_doc(doc_id)?;
        self.sparse.remove_doc(doc_id)?;
        {
            let mut hashes = self.doc_hashes.write().unwrap_or_else(|e| e.into_inner());
            hashes.remove(doc_id);
        }
        if existed {
            tracing::info!(doc_id, "Document deleted");
        }
        Ok(existed)
    }

    /// Reverts a document to an earlier version and reindexes the
    /// reverted text. Returns false when the version label is unknown.
    pub async fn revert_document(&self, doc_id: &str, version: &str) -> Result<bool> {
        if !self.store.revert_to_version(doc_id, version).await? {
            return Ok(false);
        }
        let doc = self.store.load(doc_id).await?.ok_or_else(|| {
            EngineError::NotFound(format!("document {doc_id} vanished after revert"))
        })?;
        self.index_document(&doc).await?;
        let mut hashes = self.doc_hashes.write().unwrap_or_else(|e| e.into_inner());
        hashes.insert(doc_id.to_string(), content_hash(&doc.text));
        Ok(true)
    }

    /// Hybrid retrieval with the caller's access scope applied before
    /// ranking. `None` scope means no access restriction (trusted
    /// internal callers only).
    pub async fn query(
        &self,
        query_text: &str,
        k: usize,
        access_scope: Option<AccessScope>,
    ) -> Result<RetrievalResponse> {
        let started = Instant::now();
        let query_embedding = self.embedder.embed_text(query_text).await?;
        let filter = MetadataFilter::scope(access_scope);
        let outcome = self
            .retriever
            .retrieve(&query_embedding, query_text, k, &filter)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            decision = %outcome.decision,
            results = outcome.topk.len(),
            elapsed_ms,
            "Query complete"
        );
        Ok(RetrievalResponse {
            decision: outcome.decision,
            topk: outcome.topk,
            elapsed_ms,
        })
    }

    /// Maps an answer back to the retrieved chunks that support it.
    pub fn citations(&self, answer_text: &str, hits: &[RetrievalHit]) -> Vec<Citation> {
        map_citations(answer_text, hits)
    }

    /// Rebuilds both indexes from the current version of every stored
    /// document. Runs inline; see [`Engine::start_reindex`] for the async
    /// variant.
    pub async fn reindex_all(&self) -> Result<ReindexReport> {
        let doc_ids = self.store.list_documents().await?;
        let keep: HashSet<String> = doc_ids.iter().cloned().collect();
        let mut report = ReindexReport::default();

        for doc_id in doc_ids {
            let doc = match self.store.load(&doc_id).await? {
                Some(doc) => doc,
                None => continue, // deleted mid-reindex
            };
            let (indexed, _failed) = self.index_document(&doc).await?;
            {
                let mut hashes = self.doc_hashes.write().unwrap_or_else(|e| e.into_inner());
                hashes.insert(doc_id.clone(), content_hash(&doc.text));
            }
            report.reindexed_documents += 1;
            report.reindexed_chunks += indexed;
        }

        // Forget hashes for documents no longer in the store.
        {
            let mut hashes = self.doc_hashes.write().unwrap_or_else(|e| e.into_inner());
            hashes.retain(|doc_id, _| keep.contains(doc_id));
        }
        Ok(report)
    }

    /// Schedules a full reindex on the job pool and returns its id
    /// immediately. Poll with [`Engine::job_status`].
    pub fn start_reindex(&self) -> String {
        let engine = self.clone();
        self.jobs.start(move || async move { engine.reindex_all().await })
    }

    /// Like [`Engine::start_reindex`] but refuses to stack jobs: returns
    /// the already-running job's id instead of starting a new one.
    pub fn start_reindex_if_idle(&self) -> (String, bool) {
        if let Some(running) = self.jobs.running_job() {
            return (running, false);
        }
        (self.start_reindex(), true)
    }

    pub fn job_status(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.get_status(job_id)
    }

    /// Ingests every `.txt` and `.md` file under `dir`, one document per
    /// file with the file stem as doc_id. Unreadable files are reported,
    /// not fatal.
    pub async fn ingest_dir(&self, dir: &Path, access_scope: AccessScope) -> Result<DirIngestReport> {
        let dir = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let ext = entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_ascii_lowercase();
                if ext == "txt" || ext == "md" {
                    files.push(entry.into_path());
                }
            }
            files.sort();
            files
        })
        .await
        .map_err(|e| EngineError::Join(e.to_string()))?;

        let mut report = DirIngestReport::default();
        for path in files {
            let outcome = self.ingest_file(&path, access_scope.clone()).await;
            match outcome {
                Ok(ingested) => report.ingested.push(ingested),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping file");
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        tracing::info!(
            ingested = report.ingested.len(),
            failed = report.failed.len(),
            "Directory ingestion complete"
        );
        Ok(report)
    }

    async fn ingest_file(&self, path: &Path, access_scope: AccessScope) -> Result<IngestReport> {
        let text = tokio::fs::read_to_string(path).await?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                EngineError::Validation(format!("unusable file name: {}", path.display()))
            })?;
        let doc = Document {
            doc_id: stem.to_string(),
            title: stem.to_string(),
            source: path.display().to_string(),
            doc_type: path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("txt")
                .to_string(),
            version: String::new(),
            access_scope,
            text,
        };
        self.ingest(doc).await
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
