//! Storage collaborators: blob storage for sources and artifacts, and the
//! document-record store.
//!
//! The orchestrator is written against the [`BlobStore`] and
//! [`DocumentStore`] traits and never learns what backs them. Shipped
//! implementations:
//!
//! | Type                  | Backing            | Used by                      |
//! |-----------------------|--------------------|------------------------------|
//! | [`MemoryBlobStore`]   | `HashMap` in RAM   | tests, embedding             |
//! | [`FsBlobStore`]       | a local directory  | the `paperflow run` command  |
//! | [`MemoryDocumentStore`] | `HashMap` in RAM | tests, the CLI               |
//!
//! Every failure is a [`StoreError`]: `NotFound` for absent keys and records,
//! `Transient` for everything else.

use crate::error::StoreError;
use crate::jobs::JobState;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

// ── Traits ───────────────────────────────────────────────────────────────

/// Key/value storage for source files and artifacts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Copy the blob at `key` to the local file `dest`.
    async fn fetch(&self, key: &str, dest: &Path) -> Result<(), StoreError>;

    /// Upload the local file `src` under `key`, returning the stored key.
    async fn store(&self, src: &Path, key: &str) -> Result<String, StoreError>;

    /// A time-limited URL for reading `key`.
    async fn presign(&self, key: &str, ttl_secs: u64) -> Result<String, StoreError>;

    /// Remove `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Record store for per-document state. Last write wins.
///
/// A failed run writes `failed` once more after a backoff if the first write
/// fails. When both fail, the record keeps its last status (usually
/// `processing`) while the orchestrator reports `failed`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, document_id: &str) -> Result<DocumentRecord, StoreError>;

    async fn put(&self, record: DocumentRecord) -> Result<(), StoreError>;
}

/// The persisted state of one uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    /// Blob key of the uploaded source file.
    pub file_key: String,
    pub status: JobState,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub page_count: usize,
    #[serde(default)]
    pub artifact_key: Option<String>,
    #[serde(default)]
    pub processing_error: Option<String>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl DocumentRecord {
    /// A freshly uploaded, not yet processed document.
    pub fn new(id: impl Into<String>, file_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_key: file_key.into(),
            status: JobState::Pending,
            title: String::new(),
            authors: Vec::new(),
            page_count: 0,
            artifact_key: None,
            processing_error: None,
            processed_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

// ── In-memory blob store ─────────────────────────────────────────────────

/// Blob store operations, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobOp {
    Fetch,
    Store,
    Presign,
    Delete,
}

#[derive(Default)]
struct MemoryBlobs {
    blobs: HashMap<String, Vec<u8>>,
    failures: HashMap<BlobOp, u32>,
    calls: HashMap<BlobOp, u32>,
    fetch_delay: Option<Duration>,
}

impl MemoryBlobs {
    /// Count the call and consume one injected failure, if any.
    fn begin(&mut self, op: BlobOp, key: &str) -> Result<(), StoreError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(StoreError::Transient {
                    detail: format!("injected {op:?} failure for '{key}'"),
                })
            }
            _ => Ok(()),
        }
    }
}

/// A blob store held entirely in memory.
///
/// Supports fault injection ([`fail_next`](Self::fail_next)) and a fetch
/// delay ([`set_fetch_delay`](Self::set_fetch_delay)) for exercising retry and
/// timeout paths.
#[derive(Default)]
pub struct MemoryBlobStore {
    inner: Mutex<MemoryBlobs>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.inner.lock().await.blobs.insert(key.into(), bytes.into());
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().await.blobs.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.blobs.contains_key(key)
    }

    /// Make the next `times` calls of `op` fail with a transient error.
    pub async fn fail_next(&self, op: BlobOp, times: u32) {
        self.inner.lock().await.failures.insert(op, times);
    }

    /// Sleep this long inside every `fetch`.
    pub async fn set_fetch_delay(&self, delay: Duration) {
        self.inner.lock().await.fetch_delay = Some(delay);
    }

    /// How many times `op` has been called.
    pub async fn calls(&self, op: BlobOp) -> u32 {
        self.inner
            .lock()
            .await
            .calls
            .get(&op)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, key: &str, dest: &Path) -> Result<(), StoreError> {
        let (bytes, delay) = {
            let mut inner = self.inner.lock().await;
            inner.begin(BlobOp::Fetch, key)?;
            let bytes = inner.blobs.get(key).cloned().ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })?;
            (bytes, inner.fetch_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        tokio::fs::write(dest, bytes)
            .await
            .map_err(|e| StoreError::Transient {
                detail: format!("{}: {}", dest.display(), e),
            })
    }

    async fn store(&self, src: &Path, key: &str) -> Result<String, StoreError> {
        self.inner.lock().await.begin(BlobOp::Store, key)?;
        let bytes = tokio::fs::read(src).await.map_err(|e| StoreError::Transient {
            detail: format!("{}: {}", src.display(), e),
        })?;
        self.inner.lock().await.blobs.insert(key.to_string(), bytes);
        Ok(key.to_string())
    }

    async fn presign(&self, key: &str, ttl_secs: u64) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.begin(BlobOp::Presign, key)?;
        if !inner.blobs.contains_key(key) {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(format!("memory://{}?expires={}", key, expiry(ttl_secs)))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.begin(BlobOp::Delete, key)?;
        inner.blobs.remove(key);
        Ok(())
    }
}

// ── Filesystem blob store ────────────────────────────────────────────────

/// A blob store rooted at a local directory; keys are relative paths.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` under the root. Absolute keys and `..` are refused.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let safe = !key.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn fetch(&self, key: &str, dest: &Path) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::copy(&path, dest)
            .await
            .map_err(|e| StoreError::from_io(key, e))?;
        debug!("Fetched {} → {}", key, dest.display());
        Ok(())
    }

    async fn store(&self, src: &Path, key: &str) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Transient {
                    detail: format!("{}: {}", parent.display(), e),
                })?;
        }
        // A missing source is our own scratch file vanishing, not a missing key.
        tokio::fs::copy(src, &path)
            .await
            .map_err(|e| StoreError::Transient {
                detail: format!("{}: {}", src.display(), e),
            })?;
        debug!("Stored {} → {}", src.display(), key);
        Ok(key.to_string())
    }

    async fn presign(&self, key: &str, ttl_secs: u64) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        let abs = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| StoreError::from_io(key, e))?;
        Ok(format!("file://{}?expires={}", abs.display(), expiry(ttl_secs)))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::from_io(key, e)),
        }
    }
}

/// Longest presign lifetime handed out; longer requests are capped.
pub const MAX_PRESIGN_TTL_SECS: u64 = 7 * 24 * 3600;

/// Unix timestamp `ttl_secs` from now.
fn expiry(ttl_secs: u64) -> i64 {
    let ttl = ChronoDuration::seconds(ttl_secs.min(MAX_PRESIGN_TTL_SECS) as i64);
    (Utc::now() + ttl).timestamp()
}

// ── In-memory document store ─────────────────────────────────────────────

/// A document store held in memory.
#[derive(Default)]
pub struct MemoryDocumentStore {
    records: Mutex<HashMap<String, DocumentRecord>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, document_id: &str) -> Result<DocumentRecord, StoreError> {
        self.records
            .lock()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: document_id.to_string(),
            })
    }

    async fn put(&self, record: DocumentRecord) -> Result<(), StoreError> {
        self.records.lock().await.insert(record.id.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_fetch_and_store() {
        let store = MemoryBlobStore::new();
        store.insert("uploads/a.txt", "hello").await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.txt");
        store.fetch("uploads/a.txt", &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello");

        let key = store.store(&dest, "extracted/a.json").await.unwrap();
        assert_eq!(key, "extracted/a.json");
        assert_eq!(store.get("extracted/a.json").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn memory_missing_key_is_not_found() {
        let store = MemoryBlobStore::new();
        let dir = tempfile::tempdir().unwrap();
        let err = store.fetch("nope", &dir.path().join("x")).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound { key: "nope".into() });
        assert!(store.presign("nope", 60).await.is_err());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryBlobStore::new();
        store.insert("k", "v").await;
        store.fail_next(BlobOp::Delete, 1).await;

        assert!(matches!(store.delete("k").await, Err(StoreError::Transient { .. })));
        assert!(store.contains("k").await);
        store.delete("k").await.unwrap();
        assert!(!store.contains("k").await);
        assert_eq!(store.calls(BlobOp::Delete).await, 2);
    }

    #[tokio::test]
    async fn fs_store_round_trip_and_presign() {
        let root = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(root.path());

        let src = root.path().join("input.txt");
        std::fs::write(&src, "paper").unwrap();
        store.store(&src, "uploads/p1.txt").await.unwrap();
        assert!(root.path().join("uploads/p1.txt").exists());

        let url = store.presign("uploads/p1.txt", 3600).await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.contains("?expires="));

        store.delete("uploads/p1.txt").await.unwrap();
        store.delete("uploads/p1.txt").await.unwrap();
        let err = store.fetch("uploads/p1.txt", &src).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn fs_store_refuses_escaping_keys() {
        let root = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(root.path());
        let dest = root.path().join("x");
        assert!(store.fetch("../etc/passwd", &dest).await.is_err());
        assert!(store.fetch("/etc/passwd", &dest).await.is_err());
    }

    #[tokio::test]
    async fn document_store_last_write_wins() {
        let docs = MemoryDocumentStore::new();
        assert!(docs.get("p1").await.is_err());

        docs.put(DocumentRecord::new("p1", "uploads/p1.pdf")).await.unwrap();
        let mut rec = docs.get("p1").await.unwrap();
        assert_eq!(rec.status, JobState::Pending);

        rec.status = JobState::Completed;
        docs.put(rec).await.unwrap();
        assert_eq!(docs.get("p1").await.unwrap().status, JobState::Completed);
        assert_eq!(docs.len().await, 1);
    }

    #[test]
    fn record_serialises_camel_case() {
        let rec = DocumentRecord::new("p1", "uploads/p1.pdf");
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["fileKey"], "uploads/p1.pdf");
        assert_eq!(v["status"], "pending");
    }
}
