//! Embedding capability and its implementations.
//!
//! The engine only depends on the [`Embedder`] trait: a deterministic
//! text-to-vector transform. [`OllamaEmbedder`] talks to a local Ollama
//! server; [`HashEmbedder`] is a fully deterministic in-process fallback
//! used for offline corpora and as the test double.

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::sparse::tokenize;

/// Converts text to fixed-length float vectors. Must be deterministic for
/// identical input text; idempotent re-indexing and reproducible tests rely
/// on it.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(out)
    }

    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
#[serde(untagged)]
enum OllamaEmbeddingRequest<'a> {
    Single { model: &'a str, input: &'a str },
    Batch { model: &'a str, input: &'a [String] },
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
}

/// Embedder backed by the Ollama embeddings API, with an LRU cache for
/// repeated query texts.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    ollama_url: String,
    model: String,
    query_cache: RwLock<LruCache<String, Vec<f32>>>,
}

impl OllamaEmbedder {
    /// Builds an embedder against `OLLAMA_URL` / `OLLAMA_EMBEDDING_MODEL`
    /// (defaults: `http://localhost:11434`, `nomic-embed-text`).
    pub fn from_env() -> Result<Self> {
        let ollama_url =
            std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());
        let model = std::env::var("OLLAMA_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "nomic-embed-text".to_string());
        Self::new(ollama_url, model)
    }

    pub fn new(ollama_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let ollama_url = ollama_url.into();
        let model = model.into();
        tracing::info!(url = %ollama_url, model = %model, "Configuring Ollama embedder");

        let cache_size = NonZeroUsize::new(1000).ok_or_else(|| {
            EngineError::Configuration("query cache size must be nonzero".to_string())
        })?;

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(600))
                .build()
                .map_err(|e| EngineError::Embedding(format!("HTTP client build failed: {e}")))?,
            ollama_url,
            model,
            query_cache: RwLock::new(LruCache::new(cache_size)),
        })
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest::Single {
            model: &self.model,
            input: text,
        };
        let response = self
            .client
            .post(format!("{}/api/embed", self.ollama_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Embedding(format!("Ollama request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Embedding(format!(
                "Ollama API error: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Embedding(format!("invalid Ollama response: {e}")))?;

        if let Some(embedding) = body.embedding {
            Ok(embedding)
        } else if let Some(embeddings) = body.embeddings {
            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| EngineError::Embedding("empty embeddings array".to_string()))
        } else {
            Err(EngineError::Embedding(
                "no embedding returned from Ollama".to_string(),
            ))
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.query_cache.write().await.get(text) {
            return Ok(cached.clone());
        }

        let embedding = self.request_embedding(text).await?;
        self.query_cache
            .write()
            .await
            .put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() == 1 {
            return Ok(vec![self.embed_text(&texts[0]).await?]);
        }

        let request = OllamaEmbeddingRequest::Batch {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(format!("{}/api/embed", self.ollama_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Embedding(format!("Ollama batch request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Embedding(format!(
                "Ollama API error: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Embedding(format!("invalid Ollama response: {e}")))?;
        let embeddings = body
            .embeddings
            .ok_or_else(|| EngineError::Embedding("no batch embeddings returned".to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EngineError::Embedding(format!(
                "received {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        Ok(embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Deterministic bag-of-words hashing embedder.
///
/// Each lower-cased token is hashed into one of `dimension` buckets; the
/// resulting count vector is L2-normalized. Texts sharing vocabulary get
/// high cosine similarity, which is enough signal for small corpora and
/// makes every test reproducible without a model server.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm_sq: f32 = vector.iter().map(|x| x * x).sum();
        if norm_sq > 1e-20 {
            let norm = norm_sq.sqrt();
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(128)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }
}

/// FNV-1a, fixed here so bucket assignment never changes across releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
