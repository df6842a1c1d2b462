//! Configuration types for the ingestion pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]: the heuristic rule table and chunk limits
//! used by analysis, and the retry, timeout and worker settings used by the
//! orchestrator.

use crate::error::IngestError;
use crate::jobs::status::DEFAULT_RETAINED_JOBS;
use crate::pipeline::chunker::{ChunkerOptions, DEFAULT_MAX_CHUNK_CHARS, DEFAULT_MIN_PARAGRAPH_CHARS};
use crate::pipeline::structure::SectionRules;
use crate::progress::{JobProgressCallback, NoopProgressCallback};
use std::fmt;
use std::sync::Arc;

/// Key prefix under which artifacts are stored.
pub const DEFAULT_ARTIFACT_PREFIX: &str = "extracted/";

/// Configuration for analysis and job orchestration.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use paperflow::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .max_chunk_chars(800)
///     .max_attempts(5)
///     .workers(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Ordered header rules used by section detection. Default: the canonical
    /// scholarly-paper table.
    pub section_rules: SectionRules,

    /// Paragraph and size limits for chunking. Default: 1000 / 50 chars,
    /// `References` excluded.
    pub chunker: ChunkerOptions,

    /// Total attempts per run, first try included. Default: 3.
    pub max_attempts: u32,

    /// Base delay before a retry in milliseconds. Default: 1000.
    ///
    /// Doubles after each attempt: 1 s → 2 s → 4 s.
    pub retry_backoff_ms: u64,

    /// Wall-clock budget for a single attempt in seconds. Default: 300.
    ///
    /// An attempt that exceeds it is cancelled and counts as a retryable
    /// failure.
    pub run_timeout_secs: u64,

    /// Number of worker tasks draining the queue. Default: 2.
    pub workers: usize,

    /// Bound of the work queue; `enqueue` waits when it is full. Default: 64.
    pub queue_capacity: usize,

    /// Artifact key prefix; the key is `<prefix><document_id>.json`.
    /// Default: `extracted/`.
    pub artifact_prefix: String,

    /// Lifetime of presigned source URLs in seconds. Default: 3600.
    pub presign_ttl_secs: u64,

    /// Completed documents whose status stays queryable. Default: 100.
    ///
    /// Older ones are evicted from the status board; their document record
    /// still blocks a second enqueue.
    pub retain_completed: usize,

    /// Failed documents whose status stays queryable. Default: 100.
    pub retain_failed: usize,

    /// Receives per-run events. Default: no-op.
    pub progress_callback: Arc<dyn JobProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            section_rules: SectionRules::default(),
            chunker: ChunkerOptions::default(),
            max_attempts: 3,
            retry_backoff_ms: 1000,
            run_timeout_secs: 300,
            workers: 2,
            queue_capacity: 64,
            artifact_prefix: DEFAULT_ARTIFACT_PREFIX.to_string(),
            presign_ttl_secs: 3600,
            retain_completed: DEFAULT_RETAINED_JOBS,
            retain_failed: DEFAULT_RETAINED_JOBS,
            progress_callback: Arc::new(NoopProgressCallback),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self
            .section_rules
            .rules()
            .iter()
            .map(|r| r.label.as_str())
            .collect();
        f.debug_struct("PipelineConfig")
            .field("section_rules", &labels)
            .field("max_header_chars", &self.section_rules.max_header_chars())
            .field("chunker", &self.chunker)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("run_timeout_secs", &self.run_timeout_secs)
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("artifact_prefix", &self.artifact_prefix)
            .field("presign_ttl_secs", &self.presign_ttl_secs)
            .field("retain_completed", &self.retain_completed)
            .field("retain_failed", &self.retain_failed)
            .field("progress_callback", &"<dyn JobProgressCallback>")
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Blob key of the artifact for `document_id`.
    pub fn artifact_key(&self, document_id: &str) -> String {
        format!("{}{}.json", self.artifact_prefix, document_id)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn section_rules(mut self, rules: SectionRules) -> Self {
        self.config.section_rules = rules;
        self
    }

    pub fn max_header_chars(mut self, n: usize) -> Self {
        self.config.section_rules = self.config.section_rules.with_max_header_chars(n);
        self
    }

    pub fn max_chunk_chars(mut self, n: usize) -> Self {
        self.config.chunker.max_chunk_chars = n.max(1);
        self
    }

    pub fn min_paragraph_chars(mut self, n: usize) -> Self {
        self.config.chunker.min_paragraph_chars = n;
        self
    }

    pub fn excluded_sections<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.chunker.excluded_sections = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.clamp(1, 20);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn run_timeout_secs(mut self, secs: u64) -> Self {
        self.config.run_timeout_secs = secs;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n.max(1);
        self
    }

    pub fn artifact_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.artifact_prefix = prefix.into();
        self
    }

    pub fn presign_ttl_secs(mut self, secs: u64) -> Self {
        self.config.presign_ttl_secs = secs;
        self
    }

    pub fn retain_completed(mut self, n: usize) -> Self {
        self.config.retain_completed = n;
        self
    }

    pub fn retain_failed(mut self, n: usize) -> Self {
        self.config.retain_failed = n;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn JobProgressCallback>) -> Self {
        self.config.progress_callback = cb;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, IngestError> {
        let c = &self.config;
        if c.section_rules.rules().is_empty() {
            return Err(IngestError::InvalidConfig(
                "section rule table must not be empty".into(),
            ));
        }
        if c.chunker.min_paragraph_chars > c.chunker.max_chunk_chars {
            return Err(IngestError::InvalidConfig(format!(
                "min_paragraph_chars ({}) exceeds max_chunk_chars ({})",
                c.chunker.min_paragraph_chars, c.chunker.max_chunk_chars
            )));
        }
        if c.run_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "run_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.artifact_prefix.contains("..") {
            return Err(IngestError::InvalidConfig(format!(
                "artifact prefix must not contain '..': {}",
                c.artifact_prefix
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.retry_backoff_ms, 1000);
        assert_eq!(c.chunker.max_chunk_chars, DEFAULT_MAX_CHUNK_CHARS);
        assert_eq!(c.chunker.min_paragraph_chars, DEFAULT_MIN_PARAGRAPH_CHARS);
        assert_eq!(c.chunker.excluded_sections, vec!["References"]);
        assert_eq!(c.section_rules.rules().len(), 10);
        assert_eq!(c.artifact_key("p42"), "extracted/p42.json");
        assert_eq!((c.retain_completed, c.retain_failed), (100, 100));
    }

    #[test]
    fn setters_clamp() {
        let c = PipelineConfig::builder()
            .workers(0)
            .queue_capacity(0)
            .max_attempts(0)
            .max_chunk_chars(0)
            .min_paragraph_chars(0)
            .build()
            .unwrap();
        assert_eq!(c.workers, 1);
        assert_eq!(c.queue_capacity, 1);
        assert_eq!(c.max_attempts, 1);
        assert_eq!(c.chunker.max_chunk_chars, 1);
    }

    #[test]
    fn build_rejects_inconsistent_limits() {
        let err = PipelineConfig::builder()
            .max_chunk_chars(40)
            .build()
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));

        assert!(PipelineConfig::builder().run_timeout_secs(0).build().is_err());
        assert!(PipelineConfig::builder().artifact_prefix("../x/").build().is_err());
    }

    #[test]
    fn debug_hides_callback() {
        let s = format!("{:?}", PipelineConfig::default());
        assert!(s.contains("Abstract"));
        assert!(s.contains("<dyn JobProgressCallback>"));
    }
}
