//! Job orchestration: one retryable, observable run per document.
//!
//! ## Run
//!
//! ```text
//! claim ─▶ fetch ─▶ extract ─▶ analyse ─▶ store artifact ─▶ update record
//!  10%               30%        70%                          90%      100%
//! ```
//!
//! Each attempt gets a fresh scratch directory and a wall-clock budget.
//! Retryable failures (storage trouble, timeouts) are retried up to
//! `max_attempts` times in total, with exponential backoff; input errors
//! (missing record or source, undecodable file) fail at once. The last error
//! is kept on the failed status and on the document record.
//!
//! ## Concurrency
//!
//! A fixed pool of worker tasks drains one bounded queue. Claiming is a
//! compare-and-set on the status board, so a document is processed by at most
//! one run at a time. Status is published through `watch` channels: polling
//! never blocks, and a snapshot never moves backwards.

mod orchestrator;
pub mod status;

pub use orchestrator::{DocumentView, JobHandle, Orchestrator};
pub use status::{JobState, JobStatus, RunStage};
