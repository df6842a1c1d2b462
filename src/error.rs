//! Error types for the paperflow library.
//!
//! Three error types map onto the three places a run can go wrong:
//!
//! * [`IngestError`] — **Run-level**: the orchestrator's view of a failure.
//!   Every variant knows whether it is worth retrying
//!   ([`IngestError::is_retryable`]); the orchestrator is the only place that
//!   acts on that answer.
//!
//! * [`StoreError`] — **Collaborator**: a blob store or document store call
//!   failed. `NotFound` and `Transient` are kept apart so a missing source file
//!   is never retried while a flaky network is.
//!
//! * [`ExtractError`] — **Extractor**: the source could not be turned into
//!   text. Undecodable input is terminal; I/O trouble reading the scratch copy
//!   is retried.
//!
//! Heuristic-quality issues (no sections found, zero citations) are not errors
//! at all; the text stages are infallible and degrade to whole-text chunking.

use thiserror::Error;

use crate::jobs::JobState;

/// All run-level errors returned by the paperflow library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors (terminal) ───────────────────────────────────────────
    /// The document record does not exist in the document store.
    #[error("Document not found: '{document_id}'")]
    DocumentNotFound { document_id: String },

    /// The document's source blob does not exist.
    #[error("Source file '{key}' not found in blob store")]
    SourceMissing { key: String },

    /// The source exists but could not be decoded to text.
    #[error("Failed to extract text from '{document_id}': {detail}")]
    ExtractionFailed { document_id: String, detail: String },

    // ── Infrastructure errors (retryable) ─────────────────────────────────
    /// A blob store or document store call failed transiently.
    #[error("Storage error during {operation}: {detail}")]
    Storage { operation: String, detail: String },

    /// An attempt exceeded its wall-clock budget and was abandoned.
    #[error("Run timed out after {secs}s")]
    RunTimeout { secs: u64 },

    // ── Queue / claim errors ──────────────────────────────────────────────
    /// Another run already owns this document, or it has left `pending`.
    #[error("Document '{document_id}' cannot be claimed: it is {state}")]
    AlreadyClaimed { document_id: String, state: JobState },

    /// A status record already exists for this document id.
    #[error("Document '{document_id}' has already been enqueued")]
    DuplicateDocument { document_id: String },

    /// The work queue has been shut down.
    #[error("Work queue is closed")]
    QueueClosed,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A section rule's pattern does not compile.
    #[error("Invalid section rule '{label}': {source}")]
    InvalidRule {
        label: String,
        #[source]
        source: regex::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Artifact (de)serialisation failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Whether another attempt of the same run could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Storage { .. } | IngestError::RunTimeout { .. } | IngestError::Internal(_)
        )
    }

    /// Map a store failure during `operation` into the run-level taxonomy.
    ///
    /// `NotFound` becomes `missing(key)`; everything else is a retryable
    /// [`IngestError::Storage`].
    pub(crate) fn from_store(
        operation: &str,
        err: StoreError,
        missing: impl FnOnce(String) -> IngestError,
    ) -> Self {
        match err {
            StoreError::NotFound { key } => missing(key),
            StoreError::Transient { detail } => IngestError::Storage {
                operation: operation.to_string(),
                detail,
            },
        }
    }
}

/// A failure reported by a blob store or document store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The key or record does not exist. Never retried.
    #[error("'{key}' not found")]
    NotFound { key: String },

    /// A transient I/O failure. Retried per the run's retry policy.
    #[error("transient I/O error: {detail}")]
    Transient { detail: String },
}

impl StoreError {
    /// Classify an I/O error against `key`.
    pub fn from_io(key: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound {
                key: key.to_string(),
            }
        } else {
            StoreError::Transient {
                detail: format!("{key}: {err}"),
            }
        }
    }
}

/// A failure reported by an [`crate::extract::Extractor`].
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The file is not decodable text (or not a readable PDF).
    #[error("{0}")]
    Decode(String),

    /// The local scratch copy could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub(crate) fn into_ingest(self, document_id: &str) -> IngestError {
        match self {
            ExtractError::Decode(detail) => IngestError::ExtractionFailed {
                document_id: document_id.to_string(),
                detail,
            },
            ExtractError::Io(e) => IngestError::Storage {
                operation: "extract".to_string(),
                detail: e.to_string(),
            },
        }
    }
}
