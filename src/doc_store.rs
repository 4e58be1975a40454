//! Durable, versioned document storage.
//!
//! Every `save` appends an immutable version file and advances the current
//! pointer; history is never rewritten. Reverting copies an old version's
//! content forward as a new version entry, so the revert itself shows up in
//! the history. All writes go through a temp-file-then-rename step so a
//! crash mid-save cannot leave a half-written version file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::Result;

/// Who may see a document's chunks in retrieval results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccessScope {
    Public,
    Private,
    /// Scoped to a named domain (team, tenant, product area).
    Domain(String),
}

impl From<String> for AccessScope {
    fn from(value: String) -> Self {
        match value.as_str() {
            "public" => AccessScope::Public,
            "private" => AccessScope::Private,
            _ => AccessScope::Domain(value),
        }
    }
}

impl From<AccessScope> for String {
    fn from(scope: AccessScope) -> Self {
        match scope {
            AccessScope::Public => "public".to_string(),
            AccessScope::Private => "private".to_string(),
            AccessScope::Domain(domain) => domain,
        }
    }
}

impl std::fmt::Display for AccessScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessScope::Public => f.write_str("public"),
            AccessScope::Private => f.write_str("private"),
            AccessScope::Domain(domain) => f.write_str(domain),
        }
    }
}

/// A document as ingested and stored. `(doc_id, version)` is unique; the
/// current version is the most recently saved one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub title: String,
    pub source: String,
    pub doc_type: String,
    /// Version label. Leave empty on `save` to have the store assign
    /// `"v{n}"` automatically.
    pub version: String,
    pub access_scope: AccessScope,
    pub text: String,
}

/// Descriptor of one stored version, ordered by save time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Monotonic per-document sequence number, assigned at save time.
    pub seq: u64,
    pub version: String,
    pub saved_at: DateTime<Utc>,
    /// Version file name inside the document's directory.
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocMeta {
    doc_id: String,
    next_seq: u64,
    /// Sequence number of the current version.
    current: u64,
    versions: Vec<VersionInfo>,
}

/// Summary returned by [`DocumentStore::export_snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub documents: usize,
    pub versions: usize,
}

#[derive(Serialize)]
struct SnapshotEntry<'a> {
    current: &'a Document,
    versions: &'a [VersionInfo],
}

#[derive(Serialize)]
struct Snapshot<'a> {
    exported_at: DateTime<Utc>,
    documents: Vec<SnapshotEntry<'a>>,
}

/// File-backed versioned document store.
///
/// Layout: `{root}/docs/{sanitized doc_id}/meta.json` plus one
/// `{seq:06}.json` file per version.
pub struct DocumentStore {
    root: PathBuf,
    /// Serializes meta read-modify-write cycles across concurrent savers.
    write_lock: Mutex<()>,
}

impl DocumentStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("docs")).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn doc_dir(&self, doc_id: &str) -> PathBuf {
        self.root.join("docs").join(sanitize_id(doc_id))
    }

    /// Appends a new version of `doc` and advances the current pointer.
    /// Returns the version label that was recorded (assigned if the
    /// document's `version` field was empty).
    pub async fn save(&self, doc: &Document) -> Result<String> {
        let _guard = self.write_lock.lock().await;

        let dir = self.doc_dir(&doc.doc_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut meta = match self.read_meta(&dir).await? {
            Some(meta) => meta,
            None => DocMeta {
                doc_id: doc.doc_id.clone(),
                next_seq: 1,
                current: 0,
                versions: Vec::new(),
            },
        };

        let seq = meta.next_seq;
        let version = if doc.version.is_empty() {
            format!("v{seq}")
        } else {
            doc.version.clone()
        };

        let mut stored = doc.clone();
        stored.version = version.clone();

        let file = format!("{seq:06}.json");
        write_atomic(&dir.join(&file), &serde_json::to_vec_pretty(&stored)?).await?;

        meta.versions.push(VersionInfo {
            seq,
            version: version.clone(),
            saved_at: Utc::now(),
            file,
        });
        meta.next_seq = seq + 1;
        meta.current = seq;
        self.write_meta(&dir, &meta).await?;

        tracing::info!(doc_id = %doc.doc_id, version = %version, seq, "Saved document version");
        Ok(version)
    }

    /// Loads the current version of a document, or `None` if unknown.
    pub async fn load(&self, doc_id: &str) -> Result<Option<Document>> {
        let dir = self.doc_dir(doc_id);
        let meta = match self.read_meta(&dir).await? {
            Some(meta) => meta,
            None => return Ok(None),
        };
        let current = match meta.versions.iter().find(|v| v.seq == meta.current) {
            Some(info) => info,
            None => return Ok(None),
        };
        let data = tokio::fs::read(dir.join(&current.file)).await?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Lists version descriptors oldest to newest. Unknown documents yield
    /// an empty list.
    pub async fn list_versions(&self, doc_id: &str) -> Result<Vec<VersionInfo>> {
        let dir = self.doc_dir(doc_id);
        match self.read_meta(&dir).await? {
            Some(meta) => Ok(meta.versions),
            None => Ok(Vec::new()),
        }
    }

    /// Makes a historical version the new current content by copying it
    /// forward as a fresh version entry. The replaced version stays in
    /// history. Returns `false` if the document or version is unknown.
    pub async fn revert_to_version(&self, doc_id: &str, version_name: &str) -> Result<bool> {
        let dir = self.doc_dir(doc_id);
        let target_file = {
            let meta = match self.read_meta(&dir).await? {
                Some(meta) => meta,
                None => return Ok(false),
            };
            // Newest entry carrying that label wins if the label was reused.
            match meta
                .versions
                .iter()
                .rev()
                .find(|v| v.version == version_name)
            {
                Some(info) => dir.join(&info.file),
                None => return Ok(false),
            }
        };

        let data = tokio::fs::read(&target_file).await?;
        let reverted: Document = serde_json::from_slice(&data)?;
        self.save(&reverted).await?;
        tracing::info!(doc_id, version = version_name, "Reverted document");
        Ok(true)
    }

    /// Removes a document and its entire version history. Returns `false`
    /// if the document was unknown. Derived index entries are the caller's
    /// responsibility.
    pub async fn delete(&self, doc_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let dir = self.doc_dir(doc_id);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(false);
        }
        tokio::fs::remove_dir_all(&dir).await?;
        tracing::info!(doc_id, "Deleted document and version history");
        Ok(true)
    }

    /// Returns all known document ids, sorted.
    pub async fn list_documents(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join("docs")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(meta) = self.read_meta(&entry.path()).await? {
                ids.push(meta.doc_id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Writes a single JSON archive of all current documents and their
    /// version descriptor lists to `path`, atomically.
    pub async fn export_snapshot(&self, path: &Path) -> Result<SnapshotSummary> {
        let mut documents = Vec::new();
        let mut version_lists = Vec::new();
        for doc_id in self.list_documents().await? {
            if let Some(doc) = self.load(&doc_id).await? {
                let versions = self.list_versions(&doc_id).await?;
                documents.push(doc);
                version_lists.push(versions);
            }
        }

        let entries: Vec<SnapshotEntry<'_>> = documents
            .iter()
            .zip(version_lists.iter())
            .map(|(current, versions)| SnapshotEntry {
                current,
                versions: versions.as_slice(),
            })
            .collect();
        let total_versions = version_lists.iter().map(Vec::len).sum();

        let snapshot = Snapshot {
            exported_at: Utc::now(),
            documents: entries,
        };
        write_atomic(path, &serde_json::to_vec_pretty(&snapshot)?).await?;

        let summary = SnapshotSummary {
            documents: documents.len(),
            versions: total_versions,
        };
        tracing::info!(
            documents = summary.documents,
            versions = summary.versions,
            path = %path.display(),
            "Exported snapshot"
        );
        Ok(summary)
    }

    async fn read_meta(&self, dir: &Path) -> Result<Option<DocMeta>> {
        let path = dir.join("meta.json");
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let data = tokio::fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    async fn write_meta(&self, dir: &Path, meta: &DocMeta) -> Result<()> {
        write_atomic(&dir.join("meta.json"), &serde_json::to_vec_pretty(meta)?).await
    }
}

/// Atomic write: temp file in the same directory, then rename.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Sanitizes a document id for safe use as a directory name.
fn sanitize_id(doc_id: &str) -> String {
    let trimmed = doc_id.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }

    let sanitized: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '_' || c == '.') {
        "default".to_string()
    } else {
        sanitized
    }
}
