//! # paperflow
//!
//! Turn scholarly papers into structured, chunked artifacts, behind a
//! retrying job pipeline.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Claim     pending → processing (one run per document)
//!  ├─ 2. Fetch     source blob into a per-attempt scratch dir
//!  ├─ 3. Extract   plain text + page count + metadata
//!  ├─ 4. Analyse   sections, citations, figures, chunks (spawn_blocking)
//!  ├─ 5. Persist   artifact JSON at extracted/<id>.json, record updated
//!  └─ 6. Complete  status completed / failed, with the last error
//! ```
//!
//! The text stages in [`pipeline`] are pure functions and can be used on
//! their own through [`analyze_text`] / [`analyze_document`]. The
//! [`Orchestrator`] wraps them with storage, retries, timeouts and progress
//! reporting.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paperflow::{
//!     DocumentRecord, DocumentStore, MemoryBlobStore, MemoryDocumentStore, Orchestrator,
//!     PipelineConfig, PlainTextExtractor,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let blobs = Arc::new(MemoryBlobStore::new());
//!     let records = Arc::new(MemoryDocumentStore::new());
//!     blobs.insert("uploads/p1.txt", std::fs::read("paper.txt")?).await;
//!     records.put(DocumentRecord::new("p1", "uploads/p1.txt")).await?;
//!
//!     let orch = Orchestrator::start(
//!         blobs,
//!         records,
//!         Arc::new(PlainTextExtractor),
//!         PipelineConfig::default(),
//!     );
//!     let status = orch.enqueue("p1").await?.wait().await;
//!     println!("{} ({}%)", status.state, status.progress);
//!     orch.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `paperflow` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `pdfium` | off     | `PdfiumExtractor`: read the text layer of real PDFs (needs libpdfium at runtime) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! paperflow = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze_document, analyze_text};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{ExtractError, IngestError, StoreError};
#[cfg(feature = "pdfium")]
pub use extract::PdfiumExtractor;
pub use extract::{Extractor, PlainTextExtractor};
pub use jobs::{DocumentView, JobHandle, JobState, JobStatus, Orchestrator, RunStage};
pub use output::{
    Chunk, Citation, CitationStyle, DocumentMetadata, ExtractedDocument, FigureKind,
    FigureReference, ProcessingArtifact, Section,
};
pub use pipeline::chunker::ChunkerOptions;
pub use pipeline::structure::{SectionRule, SectionRuleSpec, SectionRules};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{
    BlobOp, BlobStore, DocumentRecord, DocumentStore, FsBlobStore, MemoryBlobStore,
    MemoryDocumentStore,
};
