//! Extractors: turn a local source file into [`ExtractedDocument`].
//!
//! The orchestrator only sees the [`Extractor`] trait. Two implementations
//! ship with the crate:
//!
//! * [`PlainTextExtractor`] — UTF-8 text files. Form feeds (`\x0c`) separate
//!   pages, as produced by `pdftotext`. A file holding an extractor JSON
//!   payload (`{"text", "pageCount", "metadata"}`) is accepted verbatim, so
//!   output from an external PDF extraction step can be fed straight in.
//! * `PdfiumExtractor` (feature `pdfium`) — reads the text layer and
//!   document-info metadata of a real PDF through pdfium.
//!
//! Both do their file and decode work inside `spawn_blocking`.

use crate::error::ExtractError;
use crate::output::ExtractedDocument;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

const FORM_FEED: char = '\x0c';

/// Converts a local file into extracted text and page metadata.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError>;
}

/// Extractor for UTF-8 text and extractor-JSON payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl Extractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || extract_text_blocking(&path))
            .await
            .map_err(|e| ExtractError::Decode(format!("Extraction task panicked: {}", e)))?
    }
}

fn extract_text_blocking(path: &Path) -> Result<ExtractedDocument, ExtractError> {
    let bytes = std::fs::read(path)?;
    let raw = String::from_utf8(bytes).map_err(|e| {
        ExtractError::Decode(format!(
            "{} is not valid UTF-8 (first bad byte at {})",
            path.display(),
            e.utf8_error().valid_up_to()
        ))
    })?;

    if let Some(doc) = parse_payload(&raw) {
        debug!("{}: extractor payload, {} pages", path.display(), doc.page_count);
        return Ok(doc);
    }

    let doc = from_paged_text(&raw);
    debug!(
        "{}: {} chars over {} pages",
        path.display(),
        doc.text.len(),
        doc.page_count
    );
    Ok(doc)
}

/// A JSON object with at least a `text` field, as written by an upstream
/// extraction step.
fn parse_payload(raw: &str) -> Option<ExtractedDocument> {
    if !raw.trim_start().starts_with('{') {
        return None;
    }
    let mut doc: ExtractedDocument = serde_json::from_str(raw).ok()?;
    if doc.page_count == 0 && !doc.text.trim().is_empty() {
        doc.page_count = count_pages(&doc.text);
    }
    Some(doc)
}

/// Treat form feeds as page breaks; they become line breaks in the text.
fn from_paged_text(raw: &str) -> ExtractedDocument {
    let page_count = count_pages(raw);
    ExtractedDocument {
        text: raw.replace(FORM_FEED, "\n"),
        page_count,
        metadata: Default::default(),
    }
}

/// Pages with any non-blank content; at least one.
fn count_pages(text: &str) -> usize {
    text.split(FORM_FEED)
        .filter(|page| !page.trim().is_empty())
        .count()
        .max(1)
}

// ── pdfium ───────────────────────────────────────────────────────────────

#[cfg(feature = "pdfium")]
pub use pdfium::PdfiumExtractor;

#[cfg(feature = "pdfium")]
mod pdfium {
    use super::*;
    use crate::output::DocumentMetadata;
    use pdfium_render::prelude::*;
    use tracing::{info, warn};

    /// Extractor for PDFs, via pdfium's text layer.
    ///
    /// Binds to the system pdfium library on every call; pdfium keeps
    /// thread-local state, so the whole extraction runs on one blocking
    /// thread.
    #[derive(Debug, Clone, Default)]
    pub struct PdfiumExtractor {
        pub password: Option<String>,
    }

    #[async_trait]
    impl Extractor for PdfiumExtractor {
        async fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError> {
            let path = path.to_path_buf();
            let password = self.password.clone();
            tokio::task::spawn_blocking(move || extract_pdf_blocking(&path, password.as_deref()))
                .await
                .map_err(|e| ExtractError::Decode(format!("Extraction task panicked: {}", e)))?
        }
    }

    fn extract_pdf_blocking(
        path: &Path,
        password: Option<&str>,
    ) -> Result<ExtractedDocument, ExtractError> {
        let pdfium = Pdfium::default();
        let document = pdfium
            .load_pdf_from_file(path, password)
            .map_err(|e| ExtractError::Decode(format!("{}: {:?}", path.display(), e)))?;

        let pages = document.pages();
        let page_count = pages.len() as usize;
        info!("PDF loaded: {} pages", page_count);

        let mut text = String::new();
        for (idx, page) in pages.iter().enumerate() {
            match page.text() {
                Ok(page_text) => {
                    text.push_str(&page_text.all());
                    text.push('\n');
                }
                Err(e) => warn!("Skipping text of page {}: {:?}", idx + 1, e),
            }
        }

        let info = document.metadata();
        let get_meta = |tag: PdfDocumentMetadataTagType| -> String {
            info.get(tag).map(|t| t.value().to_string()).unwrap_or_default()
        };

        Ok(ExtractedDocument {
            text,
            page_count,
            metadata: DocumentMetadata {
                title: get_meta(PdfDocumentMetadataTagType::Title),
                author: get_meta(PdfDocumentMetadataTagType::Author),
                subject: get_meta(PdfDocumentMetadataTagType::Subject),
                keywords: get_meta(PdfDocumentMetadataTagType::Keywords),
            },
        })
    }
}
