//! CLI binary for paperflow.
//!
//! A thin shim over the library crate: `analyze` runs the text stages over
//! one file and prints the artifact; `run` pushes files through the job
//! orchestrator against a directory-backed blob store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use paperflow::{
    analyze_document, BlobStore, DocumentRecord, DocumentStore, ExtractError, ExtractedDocument,
    Extractor, FsBlobStore, JobProgressCallback, JobState, JobStatus, MemoryDocumentStore,
    Orchestrator, PipelineConfig, PipelineConfigBuilder, PlainTextExtractor, ProcessingArtifact,
    RunStage, SectionRules,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar whose length is 100 per document, so
/// stage progress from concurrent runs adds up in any order.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Last progress value seen per document.
    seen: Mutex<HashMap<String, u8>>,
}

impl CliProgressCallback {
    fn new(documents: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {percent:>3}%  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = ProgressBar::new(documents as u64 * 100);
        bar.set_style(style);
        bar.set_prefix("Ingesting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            seen: Mutex::new(HashMap::new()),
        })
    }

    /// Advance the bar to `progress` for `document_id`.
    fn bump(&self, document_id: &str, progress: u8) {
        let mut seen = self.seen.lock().unwrap();
        let last = seen.entry(document_id.to_string()).or_insert(0);
        if progress > *last {
            self.bar.inc(u64::from(progress - *last));
            *last = progress;
        }
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_run_start(&self, document_id: &str, attempt: u32) {
        let msg = if attempt > 1 {
            format!("{document_id} (attempt {attempt})")
        } else {
            document_id.to_string()
        };
        self.bar.set_message(msg);
    }

    fn on_stage(&self, document_id: &str, _stage: RunStage, progress: u8) {
        self.bump(document_id, progress);
    }

    fn on_attempt_failed(&self, document_id: &str, attempt: u32, max_attempts: u32, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  attempt {}/{}  {}",
            cyan("↻"),
            document_id,
            attempt,
            max_attempts,
            dim(&msg)
        ));
    }

    fn on_run_complete(&self, document_id: &str, status: &JobStatus) {
        // Failed runs never reach 100; fill their share of the bar.
        self.bump(document_id, 100);
        match status.state {
            JobState::Completed => self.bar.println(format!(
                "  {} {:<24} {}",
                green("✓"),
                document_id,
                dim(status.artifact_key.as_deref().unwrap_or_default())
            )),
            _ => self.bar.println(format!(
                "  {} {:<24} {}",
                red("✗"),
                document_id,
                red(status.error.as_deref().unwrap_or("failed"))
            )),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Sections, citations, figures and chunks of one paper (summary)
  paperflow analyze paper.txt

  # Full artifact as JSON
  paperflow analyze --json paper.txt > paper.json

  # Ingest several papers through the job pipeline
  paperflow run --store ./store papers/*.txt

  # Custom section rules and smaller chunks
  paperflow --rules rules.json --max-chunk-chars 600 analyze paper.txt

RULES FILE:
  A JSON array of {"label", "pattern"} objects, checked in order; the first
  case-insensitive match on a short line starts a section:

    [{"label": "Abstract", "pattern": "abstract"},
     {"label": "References", "pattern": "references|bibliography"}]

INPUT FORMATS:
  UTF-8 text (form feeds separate pages), or an extractor JSON payload
  {"text", "pageCount", "metadata"}. PDFs need a build with --features pdfium.
"#;

/// Structural analysis and chunking of scholarly papers.
#[derive(Parser, Debug)]
#[command(
    name = "paperflow",
    version,
    about = "Structural analysis and chunking of scholarly papers",
    long_about = "Split scholarly papers into named sections, find inline citations and \
figure/table references, and cut the body into bounded-size chunks. Runs one file \
directly, or many through a retrying job pipeline.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    analysis: AnalysisArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAPERFLOW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAPERFLOW_QUIET")]
    quiet: bool,
}

#[derive(Args, Debug)]
struct AnalysisArgs {
    /// JSON file with the section rule table (replaces the built-in one).
    #[arg(long, global = true, env = "PAPERFLOW_RULES")]
    rules: Option<PathBuf>,

    /// Lines this long or longer are never section headers.
    #[arg(long, global = true, env = "PAPERFLOW_MAX_HEADER_CHARS", default_value_t = 100)]
    max_header_chars: usize,

    /// Upper bound on chunk length, in characters.
    #[arg(long, global = true, env = "PAPERFLOW_MAX_CHUNK_CHARS", default_value_t = 1000)]
    max_chunk_chars: usize,

    /// Paragraphs shorter than this are dropped before chunking.
    #[arg(long, global = true, env = "PAPERFLOW_MIN_PARAGRAPH_CHARS", default_value_t = 50)]
    min_paragraph_chars: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse one file and print the artifact.
    Analyze {
        /// Text file, extractor JSON payload, or PDF (with the pdfium feature).
        input: PathBuf,

        /// Print the full artifact as JSON instead of a summary.
        #[arg(long, env = "PAPERFLOW_JSON")]
        json: bool,
    },

    /// Ingest files through the job pipeline.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Files to ingest.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Blob store directory; sources go to uploads/, artifacts to extracted/.
    #[arg(long, env = "PAPERFLOW_STORE", default_value = "paperflow-store")]
    store: PathBuf,

    /// Number of concurrent workers.
    #[arg(short, long, env = "PAPERFLOW_WORKERS", default_value_t = 2)]
    workers: usize,

    /// Attempts per document, first try included.
    #[arg(long, env = "PAPERFLOW_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Base retry delay in milliseconds (doubles per attempt).
    #[arg(long, env = "PAPERFLOW_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Wall-clock budget per attempt in seconds.
    #[arg(long, env = "PAPERFLOW_RUN_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Print final statuses as JSON.
    #[arg(long, env = "PAPERFLOW_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PAPERFLOW_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during `run`.
    let show_progress = match &cli.command {
        Command::Run(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Analyze { .. } => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Analyze { input, json } => analyze_file(&cli, input, *json).await,
        Command::Run(args) => run_files(&cli, args, show_progress).await,
    }
}

// ── analyze ──────────────────────────────────────────────────────────────────

async fn analyze_file(cli: &Cli, input: &Path, json: bool) -> Result<()> {
    let config = config_builder(&cli.analysis, None)
        .await?
        .build()
        .context("Invalid configuration")?;
    let doc: ExtractedDocument = CliExtractor
        .extract(input)
        .await
        .with_context(|| format!("Failed to extract {}", input.display()))?;
    let artifact = analyze_document(&doc, &config);

    if json {
        let out = serde_json::to_string_pretty(&artifact).context("Failed to serialise artifact")?;
        println!("{out}");
    } else {
        print_summary(input, &artifact);
    }
    Ok(())
}

fn print_summary(input: &Path, a: &ProcessingArtifact) {
    println!("File:         {}", input.display());
    if !a.metadata.title.is_empty() {
        println!("Title:        {}", a.metadata.title);
    }
    if !a.metadata.author.is_empty() {
        println!("Authors:      {}", a.metadata.authors().join("; "));
    }
    println!("Pages:        {}", a.page_count);
    println!("Sections:     {}", a.sections.len());
    for s in &a.sections {
        println!(
            "  {:<16} {}",
            s.name,
            dim(&format!("lines {}–{}", s.start_line, s.end_line))
        );
    }
    println!("Citations:    {}", a.citations.len());
    println!("Figures:      {}", a.figures.len());
    let chars: usize = a.chunks.iter().map(|c| c.char_count).sum();
    println!("Chunks:       {}  {}", a.chunks.len(), dim(&format!("({chars} chars)")));
}

// ── run ──────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport {
    document_id: String,
    source: PathBuf,
    #[serde(flatten)]
    status: JobStatus,
}

async fn run_files(cli: &Cli, args: &RunArgs, show_progress: bool) -> Result<()> {
    let progress = show_progress.then(|| CliProgressCallback::new(args.inputs.len()));
    let builder = config_builder(
        &cli.analysis,
        progress.clone().map(|p| p as Arc<dyn JobProgressCallback>),
    )
    .await?;
    let config = run_config(builder, args)?;

    let blobs = Arc::new(FsBlobStore::new(&args.store));
    let records = Arc::new(MemoryDocumentStore::new());

    // ── Upload ───────────────────────────────────────────────────────────
    let mut uploads = Vec::with_capacity(args.inputs.len());
    let mut taken = HashSet::new();
    for input in &args.inputs {
        let id = unique_id(input, &mut taken);
        let ext = input
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let key = format!("uploads/{id}{ext}");
        blobs
            .store(input, &key)
            .await
            .with_context(|| format!("Failed to upload {}", input.display()))?;
        records
            .put(DocumentRecord::new(&id, &key))
            .await
            .context("Failed to create document record")?;
        uploads.push((id, input.clone()));
    }

    // ── Process ──────────────────────────────────────────────────────────
    let orch = Orchestrator::start(blobs, records, Arc::new(CliExtractor), config);
    let mut handles = Vec::with_capacity(uploads.len());
    for (id, input) in &uploads {
        let handle = orch.enqueue(id).await.context("Failed to enqueue")?;
        handles.push((input.clone(), handle));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for (source, handle) in handles {
        let document_id = handle.document_id.clone();
        let status = handle.wait().await;
        reports.push(RunReport {
            document_id,
            source,
            status,
        });
    }
    orch.shutdown().await;

    let failed = reports
        .iter()
        .filter(|r| r.status.state == JobState::Failed)
        .count();

    if let Some(p) = &progress {
        p.bar.finish_and_clear();
    }

    if args.json {
        let out = serde_json::to_string_pretty(&reports).context("Failed to serialise report")?;
        println!("{out}");
    } else if !cli.quiet {
        if !show_progress {
            for r in &reports {
                let mark = if r.status.state == JobState::Completed {
                    green("✓")
                } else {
                    red("✗")
                };
                eprintln!(
                    "  {} {:<24} {}",
                    mark,
                    r.document_id,
                    r.status
                        .error
                        .as_deref()
                        .or(r.status.artifact_key.as_deref())
                        .unwrap_or_default()
                );
            }
        }
        let done = reports.len() - failed;
        eprintln!(
            "{} {}/{} documents processed  →  {}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&done.to_string()),
            reports.len(),
            bold(&args.store.join("extracted").display().to_string()),
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} document(s) failed");
    }
    Ok(())
}

/// Document id from the file stem, made unique within this invocation.
fn unique_id(input: &Path, taken: &mut HashSet<String>) -> String {
    let stem: String = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    let mut id = stem.clone();
    let mut n = 2;
    while !taken.insert(id.clone()) {
        id = format!("{stem}-{n}");
        n += 1;
    }
    id
}

// ── Config & extraction ──────────────────────────────────────────────────────

/// Map the analysis flags onto a config builder.
async fn config_builder(
    args: &AnalysisArgs,
    progress: Option<Arc<dyn JobProgressCallback>>,
) -> Result<PipelineConfigBuilder> {
    let rules = if let Some(ref path) = args.rules {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read rules from {:?}", path))?;
        SectionRules::from_json(&json).with_context(|| format!("Invalid rules in {:?}", path))?
    } else {
        SectionRules::default()
    };

    let mut builder = PipelineConfig::builder()
        .section_rules(rules)
        .max_header_chars(args.max_header_chars)
        .max_chunk_chars(args.max_chunk_chars)
        .min_paragraph_chars(args.min_paragraph_chars);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    Ok(builder)
}

/// Add the orchestrator flags and validate.
fn run_config(builder: PipelineConfigBuilder, args: &RunArgs) -> Result<PipelineConfig> {
    builder
        .workers(args.workers)
        .max_attempts(args.max_attempts)
        .retry_backoff_ms(args.retry_backoff_ms)
        .run_timeout_secs(args.timeout)
        .build()
        .context("Invalid configuration")
}

/// Chooses an extractor by file extension.
struct CliExtractor;

#[async_trait]
impl Extractor for CliExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError> {
        let is_pdf = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            return PlainTextExtractor.extract(path).await;
        }

        #[cfg(feature = "pdfium")]
        {
            paperflow::PdfiumExtractor::default().extract(path).await
        }
        #[cfg(not(feature = "pdfium"))]
        {
            Err(ExtractError::Decode(format!(
                "{} is a PDF; rebuild with --features pdfium or supply extracted text",
                path.display()
            )))
        }
    }
}
