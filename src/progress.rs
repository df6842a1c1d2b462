//! Progress-callback trait for per-run job events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator drives each document through its run.
//!
//! Status snapshots are also available by polling
//! ([`crate::jobs::Orchestrator::status`]) or streaming
//! ([`crate::jobs::Orchestrator::watch`]); the callback is the push-style
//! integration point for progress bars and audit logs.
//!
//! # Example
//!
//! ```rust
//! use paperflow::{JobProgressCallback, JobStatus, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_run_complete(&self, document_id: &str, status: &JobStatus) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{document_id}: {}", status.state);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { finished: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn JobProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::jobs::{JobStatus, RunStage};
use std::sync::Arc;

/// Called by the orchestrator as a run moves through its stages.
///
/// Workers run documents concurrently, so methods may be called from several
/// tasks at once. All methods have default no-op implementations so callers
/// only override what they care about.
pub trait JobProgressCallback: Send + Sync {
    /// Called at the start of every attempt (1-indexed).
    fn on_run_start(&self, document_id: &str, attempt: u32) {
        let _ = (document_id, attempt);
    }

    /// Called each time a stage finishes and the progress value advances.
    fn on_stage(&self, document_id: &str, stage: RunStage, progress: u8) {
        let _ = (document_id, stage, progress);
    }

    /// Called when an attempt fails, whether or not another attempt follows.
    ///
    /// # Arguments
    /// * `attempt`      — 1-indexed attempt that just failed
    /// * `max_attempts` — configured attempt budget
    /// * `error`        — human-readable error description
    fn on_attempt_failed(&self, document_id: &str, attempt: u32, max_attempts: u32, error: &str) {
        let _ = (document_id, attempt, max_attempts, error);
    }

    /// Called once per run with the terminal status.
    fn on_run_complete(&self, document_id: &str, status: &JobStatus) {
        let _ = (document_id, status);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        failures: AtomicUsize,
        stages: Mutex<Vec<(RunStage, u8)>>,
        terminal: Mutex<Option<JobState>>,
    }

    impl JobProgressCallback for TrackingCallback {
        fn on_run_start(&self, _document_id: &str, _attempt: u32) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage(&self, _document_id: &str, stage: RunStage, progress: u8) {
            self.stages.lock().unwrap().push((stage, progress));
        }

        fn on_attempt_failed(&self, _document_id: &str, _attempt: u32, _max: u32, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        fn on_run_complete(&self, _document_id: &str, status: &JobStatus) {
            *self.terminal.lock().unwrap() = Some(status.state);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start("doc", 1);
        cb.on_stage("doc", RunStage::Claimed, 10);
        cb.on_attempt_failed("doc", 1, 3, "storage unavailable");
        cb.on_run_complete("doc", &JobStatus::pending());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_run_start("doc", 1);
        tracker.on_stage("doc", RunStage::Claimed, 10);
        tracker.on_attempt_failed("doc", 1, 3, "timed out");
        tracker.on_run_start("doc", 2);
        tracker.on_stage("doc", RunStage::Extracted, 30);

        let mut done = JobStatus::pending();
        done.state = JobState::Completed;
        tracker.on_run_complete("doc", &done);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 1);
        assert_eq!(
            *tracker.stages.lock().unwrap(),
            vec![(RunStage::Claimed, 10), (RunStage::Extracted, 30)]
        );
        assert_eq!(*tracker.terminal.lock().unwrap(), Some(JobState::Completed));
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_start("doc", 1);
        cb.on_stage("doc", RunStage::Persisted, 90);
    }
}
