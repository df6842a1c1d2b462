//! Job states, the polling payload, and the per-document status board.
//!
//! ```text
//! pending ──claim──▶ processing ──┬──▶ completed
//!                                 └──▶ failed
//! ```
//!
//! The board is the only shared mutable state besides the queue. Each
//! document has one `watch` channel; writers go through the board's
//! transition checks, so a published snapshot never moves backwards:
//! terminal states are final and progress only increases.
//!
//! Only the most recent terminal documents are kept (per state, oldest
//! evicted first). Pending and processing slots are never evicted.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Processing status of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    fn can_become(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
        ) || (self == next && !self.is_terminal())
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checkpoints of a run, each with a fixed progress value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    /// The document was claimed for processing.
    Claimed,
    /// Source fetched and text extracted.
    Extracted,
    /// Sections, citations, figures and chunks computed.
    Analyzed,
    /// Artifact stored and record updated.
    Persisted,
    Completed,
}

impl RunStage {
    pub fn progress(self) -> u8 {
        match self {
            RunStage::Claimed => 10,
            RunStage::Extracted => 30,
            RunStage::Analyzed => 70,
            RunStage::Persisted => 90,
            RunStage::Completed => 100,
        }
    }
}

/// The polling payload for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: JobState,
    /// 0–100.
    pub progress: u8,
    /// Human-readable description of the last failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_key: Option<String>,
    /// Attempts started so far.
    pub attempts: u32,
}

impl JobStatus {
    pub fn pending() -> Self {
        Self {
            state: JobState::Pending,
            progress: 0,
            error: None,
            artifact_key: None,
            attempts: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// ── Board ────────────────────────────────────────────────────────────────

struct Slot {
    job_id: Option<String>,
    tx: watch::Sender<JobStatus>,
}

#[derive(Default)]
struct Slots {
    by_document: HashMap<String, Slot>,
    by_job: HashMap<String, String>,
    completed: VecDeque<String>,
    failed: VecDeque<String>,
}

impl Slots {
    fn remove(&mut self, document_id: &str) {
        if let Some(Slot {
            job_id: Some(job_id),
            ..
        }) = self.by_document.remove(document_id)
        {
            self.by_job.remove(&job_id);
        }
    }
}

/// Terminal slots kept per state when no limit is configured.
pub const DEFAULT_RETAINED_JOBS: usize = 100;

/// Per-document status channels.
pub(crate) struct StatusBoard {
    slots: Mutex<Slots>,
    retain_completed: usize,
    retain_failed: usize,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_JOBS, DEFAULT_RETAINED_JOBS)
    }
}

impl StatusBoard {
    /// A board keeping at most `retain_completed` completed and
    /// `retain_failed` failed documents.
    pub(crate) fn new(retain_completed: usize, retain_failed: usize) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            retain_completed,
            retain_failed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new `pending` document under `job_id`.
    pub(crate) fn register(&self, document_id: &str, job_id: &str) -> Result<(), IngestError> {
        let mut slots = self.lock();
        if slots.by_document.contains_key(document_id) {
            return Err(IngestError::DuplicateDocument {
                document_id: document_id.to_string(),
            });
        }
        let (tx, _) = watch::channel(JobStatus::pending());
        slots.by_document.insert(
            document_id.to_string(),
            Slot {
                job_id: Some(job_id.to_string()),
                tx,
            },
        );
        slots
            .by_job
            .insert(job_id.to_string(), document_id.to_string());
        Ok(())
    }

    /// Drop a registration that never reached the queue.
    pub(crate) fn unregister(&self, document_id: &str) {
        self.lock().remove(document_id);
    }

    /// Compare-and-set `pending → processing`. A document with no slot yet
    /// (a direct run, never enqueued) is created already claimed.
    ///
    /// The returned receiver outlives eviction of the slot, so the run can
    /// always read its final status.
    pub(crate) fn claim(&self, document_id: &str) -> Result<watch::Receiver<JobStatus>, IngestError> {
        let mut slots = self.lock();
        match slots.by_document.get(document_id) {
            None => {
                let (tx, rx) = watch::channel(JobStatus {
                    state: JobState::Processing,
                    ..JobStatus::pending()
                });
                slots
                    .by_document
                    .insert(document_id.to_string(), Slot { job_id: None, tx });
                Ok(rx)
            }
            Some(slot) => {
                let current = slot.tx.borrow().state;
                if current != JobState::Pending {
                    return Err(IngestError::AlreadyClaimed {
                        document_id: document_id.to_string(),
                        state: current,
                    });
                }
                slot.tx.send_modify(|s| s.state = JobState::Processing);
                Ok(slot.tx.subscribe())
            }
        }
    }

    /// Apply `edit` to a copy of the current status and publish it if the
    /// result is a legal successor. Returns whether it was published.
    pub(crate) fn update(&self, document_id: &str, edit: impl FnOnce(&mut JobStatus)) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.by_document.get(document_id) else {
            warn!("Status update for unknown document '{}'", document_id);
            return false;
        };
        let mut finished = None;
        let published = slot.tx.send_if_modified(|status| {
            let mut next = status.clone();
            edit(&mut next);
            next.progress = next.progress.min(100);
            let legal = status.state.can_become(next.state) && next.progress >= status.progress;
            if !legal {
                warn!(
                    "Rejected status update for '{}': {} {}% → {} {}%",
                    document_id, status.state, status.progress, next.state, next.progress
                );
                return false;
            }
            if next == *status {
                return false;
            }
            if next.state.is_terminal() && !status.state.is_terminal() {
                finished = Some(next.state);
            }
            *status = next;
            true
        });
        if let Some(state) = finished {
            self.retire(&mut slots, document_id, state);
        }
        published
    }

    /// Queue a newly terminal document and evict the oldest beyond the limit.
    fn retire(&self, slots: &mut Slots, document_id: &str, state: JobState) {
        let (queue, limit) = match state {
            JobState::Completed => (&mut slots.completed, self.retain_completed),
            _ => (&mut slots.failed, self.retain_failed),
        };
        queue.push_back(document_id.to_string());
        let mut evicted = Vec::new();
        while queue.len() > limit {
            if let Some(oldest) = queue.pop_front() {
                evicted.push(oldest);
            }
        }
        for id in evicted {
            debug!("Evicting {} status for '{}'", state, id);
            slots.remove(&id);
        }
    }

    pub(crate) fn get(&self, document_id: &str) -> Option<JobStatus> {
        self.lock()
            .by_document
            .get(document_id)
            .map(|slot| slot.tx.borrow().clone())
    }

    pub(crate) fn document_for_job(&self, job_id: &str) -> Option<String> {
        self.lock().by_job.get(job_id).cloned()
    }

    pub(crate) fn subscribe(&self, document_id: &str) -> Option<watch::Receiver<JobStatus>> {
        self.lock()
            .by_document
            .get(document_id)
            .map(|slot| slot.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(JobState::Processing.to_string(), "processing");
        assert_eq!(serde_json::to_value(JobState::Failed).unwrap(), "failed");
    }

    #[test]
    fn stage_progress_is_monotonic() {
        let stages = [
            RunStage::Claimed,
            RunStage::Extracted,
            RunStage::Analyzed,
            RunStage::Persisted,
            RunStage::Completed,
        ];
        let values: Vec<u8> = stages.iter().map(|s| s.progress()).collect();
        assert_eq!(values, vec![10, 30, 70, 90, 100]);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let board = StatusBoard::default();
        board.register("p1", "job-1").unwrap();
        let err = board.register("p1", "job-2").unwrap_err();
        assert!(matches!(err, IngestError::DuplicateDocument { .. }));
        assert_eq!(board.document_for_job("job-1").as_deref(), Some("p1"));
        assert_eq!(board.document_for_job("job-2"), None);
    }

    #[test]
    fn second_claim_is_rejected() {
        let board = StatusBoard::default();
        board.register("p1", "job-1").unwrap();
        board.claim("p1").unwrap();
        let err = board.claim("p1").unwrap_err();
        assert!(matches!(
            err,
            IngestError::AlreadyClaimed { state: JobState::Processing, .. }
        ));
    }

    #[test]
    fn unregistered_document_is_claimed_directly() {
        let board = StatusBoard::default();
        board.claim("p2").unwrap();
        assert_eq!(board.get("p2").unwrap().state, JobState::Processing);
    }

    #[test]
    fn progress_and_state_never_regress() {
        let board = StatusBoard::default();
        board.claim("p1").unwrap();
        assert!(board.update("p1", |s| s.progress = 70));
        assert!(!board.update("p1", |s| s.progress = 30));
        assert_eq!(board.get("p1").unwrap().progress, 70);

        assert!(board.update("p1", |s| s.state = JobState::Completed));
        assert!(!board.update("p1", |s| s.state = JobState::Processing));
        assert!(!board.update("p1", |s| s.state = JobState::Failed));
        assert_eq!(board.get("p1").unwrap().state, JobState::Completed);
    }

    #[test]
    fn subscribers_see_updates() {
        let board = StatusBoard::default();
        board.register("p1", "job-1").unwrap();
        let rx = board.subscribe("p1").unwrap();
        board.claim("p1").unwrap();
        board.update("p1", |s| s.progress = 10);
        assert_eq!(rx.borrow().state, JobState::Processing);
        assert_eq!(rx.borrow().progress, 10);
    }

    #[test]
    fn oldest_terminal_slots_are_evicted() {
        let board = StatusBoard::new(2, 1);
        for i in 0..5 {
            let doc = format!("d{i}");
            board.register(&doc, &format!("job-{i}")).unwrap();
            board.claim(&doc).unwrap();
            let state = if i == 3 { JobState::Failed } else { JobState::Completed };
            board.update(&doc, |s| s.state = state);
        }

        // Completed: d0 d1 d2 d4 with room for two. Failed: d3.
        assert!(board.get("d0").is_none());
        assert!(board.get("d1").is_none());
        assert_eq!(board.document_for_job("job-0"), None);
        assert_eq!(board.get("d2").unwrap().state, JobState::Completed);
        assert_eq!(board.get("d4").unwrap().state, JobState::Completed);
        assert_eq!(board.get("d3").unwrap().state, JobState::Failed);
        assert_eq!(board.lock().by_document.len(), 3);
    }

    #[test]
    fn active_slots_are_never_evicted() {
        let board = StatusBoard::new(0, 0);
        board.register("waiting", "job-1").unwrap();
        let rx = board.claim("running").unwrap();
        board.claim("done").unwrap();
        board.update("done", |s| s.state = JobState::Completed);

        assert!(board.get("done").is_none());
        assert_eq!(board.get("waiting").unwrap().state, JobState::Pending);
        assert_eq!(board.get("running").unwrap().state, JobState::Processing);
        assert_eq!(rx.borrow().state, JobState::Processing);
    }

    #[test]
    fn claim_receiver_survives_eviction() {
        let board = StatusBoard::new(0, 0);
        let rx = board.claim("p1").unwrap();
        board.update("p1", |s| {
            s.state = JobState::Failed;
            s.error = Some("boom".into());
        });
        assert!(board.get("p1").is_none());
        assert_eq!(rx.borrow().state, JobState::Failed);
        assert_eq!(rx.borrow().error.as_deref(), Some("boom"));
    }

    #[test]
    fn unregister_frees_the_id() {
        let board = StatusBoard::default();
        board.register("p1", "job-1").unwrap();
        board.unregister("p1");
        assert!(board.get("p1").is_none());
        board.register("p1", "job-2").unwrap();
    }
}
