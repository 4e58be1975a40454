//! Hybrid retrieval engine combining dense (embedding cosine) and sparse
//! (term frequency) search over a versioned, access-controlled document
//! store.
//!
//! Documents are chunked deterministically, embedded, and indexed on both
//! sides; queries fuse the two score spaces with configurable weights and
//! report an explicit hit/no-hit decision against a relevance threshold.
//! Full reindexing runs as polled background jobs on a bounded worker
//! pool.
//!
//! [`engine::Engine`] is the main entry point:
//!
//! ```no_run
//! use std::sync::Arc;
//! use hybrid_rag::{
//!     AccessScope, Document, DocumentStore, Engine, EngineConfig, HashEmbedder,
//!     InMemoryDenseIndex, InMemorySparseIndex, ReindexJobManager,
//! };
//!
//! # async fn run() -> hybrid_rag::Result<()> {
//! let config = EngineConfig::from_env();
//! let store = Arc::new(DocumentStore::open("./data").await?);
//! let jobs = Arc::new(ReindexJobManager::new(config.reindex_workers));
//! let engine = Engine::new(
//!     config,
//!     store,
//!     Arc::new(HashEmbedder::default()),
//!     Arc::new(InMemoryDenseIndex::new()),
//!     Arc::new(InMemorySparseIndex::new()),
//!     jobs,
//! )?;
//!
//! engine
//!     .ingest(Document {
//!         doc_id: "handbook".to_string(),
//!         title: "Employee Handbook".to_string(),
//!         source: "upload".to_string(),
//!         doc_type: "md".to_string(),
//!         version: String::new(),
//!         access_scope: AccessScope::Public,
//!         text: "rotate keys every 90 days".to_string(),
//!     })
//!     .await?;
//!
//! let response = engine.query("key rotation", 5, Some(AccessScope::Public)).await?;
//! println!("{:?}: {} hits", response.decision, response.topk.len());
//! # Ok(())
//! # }
//! ```

pub mod chunker;
pub mod citations;
pub mod config;
pub mod dense;
pub mod doc_store;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod jobs;
pub mod sparse;

pub use chunker::{Chunk, ChunkMetadata, ChunkSpan, MetadataFilter};
pub use citations::Citation;
pub use config::EngineConfig;
pub use dense::{DenseIndex, InMemoryDenseIndex, IndexEntry, RetrievalHit};
pub use doc_store::{AccessScope, Document, DocumentStore, SnapshotSummary, VersionInfo};
pub use embedder::{Embedder, HashEmbedder, OllamaEmbedder};
pub use engine::{DirIngestReport, Engine, IngestReport, RetrievalResponse};
pub use error::{EngineError, Result};
pub use fusion::{Decision, HybridRetriever, RetrievalOutcome};
pub use jobs::{JobRecord, JobStatus, ReindexJobManager, ReindexReport};
pub use sparse::{InMemorySparseIndex, SparseIndex};
