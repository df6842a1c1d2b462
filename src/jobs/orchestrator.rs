//! The orchestrator: queue, workers, and the retrying run loop.

use super::status::{JobState, JobStatus, RunStage, StatusBoard};
use crate::analyze::analyze_document;
use crate::config::PipelineConfig;
use crate::error::{IngestError, StoreError};
use crate::extract::Extractor;
use crate::output::ProcessingArtifact;
use crate::store::{BlobStore, DocumentRecord, DocumentStore};
use chrono::Utc;
use std::ffi::OsString;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

/// One unit of queued work.
#[derive(Debug)]
struct QueuedJob {
    job_id: String,
    document_id: String,
}

/// Returned by [`Orchestrator::enqueue`]; resolves to the terminal status.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: String,
    pub document_id: String,
    rx: watch::Receiver<JobStatus>,
}

impl JobHandle {
    /// The latest published status.
    pub fn status(&self) -> JobStatus {
        self.rx.borrow().clone()
    }

    /// Wait until the job reaches `completed` or `failed`.
    pub async fn wait(mut self) -> JobStatus {
        if let Ok(status) = self.rx.wait_for(JobStatus::is_terminal).await {
            return status.clone();
        }
        let status = self.rx.borrow().clone();
        status
    }
}

/// What [`Orchestrator::load_artifact`] finds for a document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentView {
    /// Not completed yet (or failed); only the record is available.
    Pending { record: DocumentRecord },
    /// Completed: the stored artifact plus a time-limited source URL.
    Ready {
        record: DocumentRecord,
        artifact: ProcessingArtifact,
        source_url: String,
    },
}

/// Drives documents through the pipeline with bounded retries.
///
/// Collaborators are injected at construction. [`Orchestrator::start`] spawns
/// `config.workers` tasks that drain one bounded queue; [`Orchestrator::run`]
/// executes a run in the caller's task instead.
pub struct Orchestrator {
    inner: Arc<Inner>,
    queue: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn DocumentStore>,
    extractor: Arc<dyn Extractor>,
    config: PipelineConfig,
    board: StatusBoard,
    next_job: AtomicU64,
}

impl Orchestrator {
    /// Build the orchestrator and spawn its workers. Must be called inside a
    /// Tokio runtime.
    pub fn start(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn DocumentStore>,
        extractor: Arc<dyn Extractor>,
        config: PipelineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let worker_count = config.workers;
        let board = StatusBoard::new(config.retain_completed, config.retain_failed);

        let inner = Arc::new(Inner {
            blobs,
            records,
            extractor,
            config,
            board,
            next_job: AtomicU64::new(1),
        });

        let workers = (0..worker_count)
            .map(|n| tokio::spawn(worker_loop(n, Arc::clone(&inner), Arc::clone(&rx))))
            .collect();

        info!("Orchestrator started with {} workers", worker_count);
        Self {
            inner,
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Record `document_id` as `pending` and queue it.
    ///
    /// Waits while the queue is full. A document that already has a status,
    /// or whose record shows it already finished, is rejected with
    /// [`IngestError::DuplicateDocument`].
    pub async fn enqueue(&self, document_id: &str) -> Result<JobHandle, IngestError> {
        if self.inner.finished_on_record(document_id).await.is_some() {
            return Err(IngestError::DuplicateDocument {
                document_id: document_id.to_string(),
            });
        }
        let job_id = format!("job-{}", self.inner.next_job.fetch_add(1, Ordering::Relaxed));
        let board = &self.inner.board;
        board.register(document_id, &job_id)?;

        let rx = board.subscribe(document_id).ok_or_else(|| {
            IngestError::Internal(format!("status slot for '{}' vanished", document_id))
        })?;

        let sender = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            board.unregister(document_id);
            return Err(IngestError::QueueClosed);
        };

        let job = QueuedJob {
            job_id: job_id.clone(),
            document_id: document_id.to_string(),
        };
        if sender.send(job).await.is_err() {
            board.unregister(document_id);
            return Err(IngestError::QueueClosed);
        }

        info!("Enqueued {} as {}", document_id, job_id);
        Ok(JobHandle {
            job_id,
            document_id: document_id.to_string(),
            rx,
        })
    }

    /// Execute one run of `document_id` in the caller's task.
    ///
    /// Returns the terminal status, `failed` included. Errors only when the
    /// document cannot be claimed.
    pub async fn run(&self, document_id: &str) -> Result<JobStatus, IngestError> {
        self.inner.run(document_id).await
    }

    /// Current status of a document, if it is known. Finished documents are
    /// forgotten once more than `retain_completed` / `retain_failed` newer
    /// ones have finished.
    pub fn status(&self, document_id: &str) -> Option<JobStatus> {
        self.inner.board.get(document_id)
    }

    /// Current status of the document queued as `job_id`.
    pub fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        let document_id = self.inner.board.document_for_job(job_id)?;
        self.inner.board.get(&document_id)
    }

    /// Stream of status snapshots, starting with the current one.
    pub fn watch(&self, document_id: &str) -> Option<WatchStream<JobStatus>> {
        self.inner.board.subscribe(document_id).map(WatchStream::new)
    }

    /// Read a document's record and, once completed, its artifact and a
    /// presigned source URL.
    pub async fn load_artifact(&self, document_id: &str) -> Result<DocumentView, IngestError> {
        self.inner.load_artifact(document_id).await
    }

    /// Close the queue, let workers finish what is queued, and join them.
    pub async fn shutdown(&self) {
        drop(self.queue.lock().unwrap_or_else(PoisonError::into_inner).take());
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }
        info!("Orchestrator stopped");
    }
}

async fn worker_loop(
    n: usize,
    inner: Arc<Inner>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            debug!("Worker {} exiting: queue closed", n);
            break;
        };

        debug!("Worker {} picked up {} ({})", n, job.job_id, job.document_id);
        let task_inner = Arc::clone(&inner);
        let document_id = job.document_id.clone();
        // Own task, so a panicking run cannot take the worker down.
        let outcome = tokio::spawn(async move { task_inner.run(&document_id).await }).await;

        match outcome {
            Ok(Ok(status)) => info!("{}: {} after {} attempt(s)", job.document_id, status.state, status.attempts),
            Ok(Err(e)) => warn!("{}: not run: {}", job.document_id, e),
            Err(e) => error!("{}: run task aborted: {}", job.document_id, e),
        }
    }
}

// ── Run loop ─────────────────────────────────────────────────────────────

const ABANDONED: &str = "run abandoned before completion";

/// Marks the document failed if a claimed run is dropped before reaching a
/// terminal state (task cancelled or panicked).
///
/// The board is updated in place; the record write is spawned onto the
/// current runtime, if there is one.
struct ClaimGuard<'a> {
    board: &'a StatusBoard,
    document_id: &'a str,
    records: Option<Arc<dyn DocumentStore>>,
    armed: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(board: &'a StatusBoard, document_id: &'a str) -> Self {
        Self {
            board,
            document_id,
            records: None,
            armed: true,
        }
    }

    fn with_records(mut self, records: Arc<dyn DocumentStore>) -> Self {
        self.records = Some(records);
        self
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "Run of '{}' dropped while processing; marking failed",
                self.document_id
            );
            self.board.update(self.document_id, |s| {
                s.state = JobState::Failed;
                s.error = Some(ABANDONED.to_string());
            });

            let Some(records) = self.records.take() else {
                return;
            };
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                warn!("{}: no runtime to record abandonment", self.document_id);
                return;
            };
            let document_id = self.document_id.to_string();
            runtime.spawn(async move {
                if let Err(e) = mark_record_failed(records.as_ref(), &document_id, ABANDONED).await {
                    warn!("{}: cannot record failure: {}", document_id, e);
                }
            });
        }
    }
}

impl Inner {
    async fn run(self: &Arc<Self>, document_id: &str) -> Result<JobStatus, IngestError> {
        if let Some(state) = self.finished_on_record(document_id).await {
            return Err(IngestError::AlreadyClaimed {
                document_id: document_id.to_string(),
                state,
            });
        }
        let status_rx = self.board.claim(document_id)?;
        let guard = ClaimGuard::new(&self.board, document_id).with_records(Arc::clone(&self.records));
        self.advance(document_id, RunStage::Claimed);

        let cb = &self.config.progress_callback;
        let max_attempts = self.config.max_attempts.max(1);
        let budget = Duration::from_secs(self.config.run_timeout_secs);
        let mut stored_artifact: Option<String> = None;
        let mut attempt = 0u32;

        let outcome = loop {
            attempt += 1;
            self.board.update(document_id, |s| s.attempts = attempt);
            cb.on_run_start(document_id, attempt);
            debug!("{}: attempt {}/{}", document_id, attempt, max_attempts);

            let result =
                tokio::time::timeout(budget, self.attempt(document_id, &mut stored_artifact)).await;
            let err = match result {
                Ok(Ok(artifact_key)) => break Ok(artifact_key),
                Ok(Err(e)) => e,
                Err(_) => IngestError::RunTimeout {
                    secs: self.config.run_timeout_secs,
                },
            };

            warn!(
                "{}: attempt {}/{} failed: {}",
                document_id, attempt, max_attempts, err
            );
            cb.on_attempt_failed(document_id, attempt, max_attempts, &err.to_string());

            if !err.is_retryable() || attempt >= max_attempts {
                break Err(err);
            }

            let backoff = self.backoff(attempt);
            debug!("{}: retrying in {:?}", document_id, backoff);
            tokio::time::sleep(backoff).await;
        };

        match outcome {
            Ok(artifact_key) => {
                self.board.update(document_id, |s| {
                    s.state = JobState::Completed;
                    s.progress = RunStage::Completed.progress();
                    s.artifact_key = Some(artifact_key.clone());
                    s.error = None;
                });
                cb.on_stage(document_id, RunStage::Completed, RunStage::Completed.progress());
                info!("{}: completed → {}", document_id, artifact_key);
            }
            Err(err) => {
                let message = err.to_string();
                if let Some(key) = stored_artifact.take() {
                    self.discard_artifact(&key).await;
                }
                self.record_failure(document_id, &message).await;
                self.board.update(document_id, |s| {
                    s.state = JobState::Failed;
                    s.artifact_key = None;
                    s.error = Some(message.clone());
                });
                error!("{}: failed after {} attempt(s): {}", document_id, attempt, message);
            }
        }

        guard.disarm();
        let status = status_rx.borrow().clone();
        cb.on_run_complete(document_id, &status);
        Ok(status)
    }

    /// The terminal state a document's record shows when the board no
    /// longer (or never did) track it. Lookup failures count as unknown.
    async fn finished_on_record(&self, document_id: &str) -> Option<JobState> {
        if self.board.get(document_id).is_some() {
            return None;
        }
        match self.records.get(document_id).await {
            Ok(record) if record.status.is_terminal() => Some(record.status),
            Ok(_) => None,
            Err(e) => {
                debug!("{}: no record state: {}", document_id, e);
                None
            }
        }
    }

    /// `retry_backoff_ms · 2^(attempt-1)`.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.config.retry_backoff_ms.saturating_mul(factor))
    }

    fn advance(&self, document_id: &str, stage: RunStage) {
        let progress = stage.progress();
        if self
            .board
            .update(document_id, |s| s.progress = s.progress.max(progress))
        {
            self.config
                .progress_callback
                .on_stage(document_id, stage, progress);
        }
    }

    /// One attempt: fetch, extract, analyse, persist. Returns the artifact key.
    ///
    /// The scratch directory lives exactly as long as this future, so it is
    /// removed on success, on error, and when the attempt is cancelled.
    async fn attempt(
        self: &Arc<Self>,
        document_id: &str,
        stored_artifact: &mut Option<String>,
    ) -> Result<String, IngestError> {
        let mut record = self.load_record(document_id).await?;
        if record.status != JobState::Processing {
            record.status = JobState::Processing;
            self.records
                .put(record.clone())
                .await
                .map_err(storage("mark processing"))?;
        }

        let scratch = tempfile::Builder::new()
            .prefix("paperflow-")
            .tempdir()
            .map_err(|e| IngestError::Storage {
                operation: "create scratch dir".into(),
                detail: e.to_string(),
            })?;

        // ── Fetch + extract ──────────────────────────────────────────────
        let source_name = Path::new(&record.file_key)
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("source"));
        let source_path = scratch.path().join(source_name);
        self.blobs
            .fetch(&record.file_key, &source_path)
            .await
            .map_err(|e| IngestError::from_store("fetch source", e, |key| IngestError::SourceMissing { key }))?;

        let doc = self
            .extractor
            .extract(&source_path)
            .await
            .map_err(|e| e.into_ingest(document_id))?;
        self.advance(document_id, RunStage::Extracted);

        // ── Analyse ──────────────────────────────────────────────────────
        let inner = Arc::clone(self);
        let artifact = tokio::task::spawn_blocking(move || analyze_document(&doc, &inner.config))
            .await
            .map_err(|e| IngestError::Internal(format!("Analysis task panicked: {}", e)))?;
        self.advance(document_id, RunStage::Analyzed);

        // ── Persist ──────────────────────────────────────────────────────
        let artifact_path = scratch.path().join("artifact.json");
        let bytes = serde_json::to_vec_pretty(&artifact)?;
        tokio::fs::write(&artifact_path, bytes)
            .await
            .map_err(|e| IngestError::Storage {
                operation: "write artifact".into(),
                detail: e.to_string(),
            })?;

        let key = self.config.artifact_key(document_id);
        let key = self
            .blobs
            .store(&artifact_path, &key)
            .await
            .map_err(storage("store artifact"))?;
        *stored_artifact = Some(key.clone());

        if !artifact.metadata.title.trim().is_empty() {
            record.title = artifact.metadata.title.trim().to_string();
        }
        let authors = artifact.metadata.authors();
        if !authors.is_empty() {
            record.authors = authors;
        }
        record.page_count = artifact.page_count;
        record.artifact_key = Some(key.clone());
        record.status = JobState::Completed;
        record.processing_error = None;
        record.processed_at = Some(Utc::now());
        self.records
            .put(record)
            .await
            .map_err(storage("update record"))?;
        self.advance(document_id, RunStage::Persisted);

        Ok(key)
    }

    async fn load_record(&self, document_id: &str) -> Result<DocumentRecord, IngestError> {
        self.records.get(document_id).await.map_err(|e| {
            IngestError::from_store("load record", e, |_| IngestError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
        })
    }

    async fn discard_artifact(&self, key: &str) {
        match self.blobs.delete(key).await {
            Ok(()) => debug!("Deleted partial artifact {}", key),
            Err(e) => warn!("Could not delete partial artifact {}: {}", key, e),
        }
    }

    /// Persist the failure, retrying once after the first backoff step.
    async fn record_failure(&self, document_id: &str, message: &str) {
        let err = match mark_record_failed(self.records.as_ref(), document_id, message).await {
            Ok(()) => return,
            Err(e) => e,
        };
        let backoff = self.backoff(1);
        warn!(
            "{}: cannot record failure ({}); retrying in {:?}",
            document_id, err, backoff
        );
        tokio::time::sleep(backoff).await;
        if let Err(e) = mark_record_failed(self.records.as_ref(), document_id, message).await {
            error!("{}: record left unfinished: {}", document_id, e);
        }
    }

    async fn load_artifact(&self, document_id: &str) -> Result<DocumentView, IngestError> {
        let record = self.load_record(document_id).await?;
        let artifact_key = match record.artifact_key.clone() {
            Some(key) if record.status == JobState::Completed => key,
            _ => return Ok(DocumentView::Pending { record }),
        };

        let scratch = tempfile::tempdir().map_err(|e| IngestError::Storage {
            operation: "create scratch dir".into(),
            detail: e.to_string(),
        })?;
        let path = scratch.path().join("artifact.json");
        self.blobs
            .fetch(&artifact_key, &path)
            .await
            .map_err(|e| IngestError::from_store("fetch artifact", e, |key| IngestError::SourceMissing { key }))?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| IngestError::Storage {
            operation: "read artifact".into(),
            detail: e.to_string(),
        })?;
        let artifact: ProcessingArtifact = serde_json::from_slice(&bytes)?;

        let source_url = self
            .blobs
            .presign(&record.file_key, self.config.presign_ttl_secs)
            .await
            .map_err(|e| IngestError::from_store("presign source", e, |key| IngestError::SourceMissing { key }))?;

        Ok(DocumentView::Ready {
            record,
            artifact,
            source_url,
        })
    }
}

async fn mark_record_failed(
    records: &dyn DocumentStore,
    document_id: &str,
    message: &str,
) -> Result<(), StoreError> {
    let mut record = records.get(document_id).await?;
    record.status = JobState::Failed;
    record.artifact_key = None;
    record.processing_error = Some(message.to_string());
    records.put(record).await
}

/// Map any store failure during `operation` to a retryable storage error.
fn storage(operation: &'static str) -> impl FnOnce(StoreError) -> IngestError {
    move |e| IngestError::Storage {
        operation: operation.to_string(),
        detail: e.to_string(),
    }
}
