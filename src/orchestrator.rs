//! The batch state machine.
//!
//! [`Pipeline::run`] reads the checkpoint, works out where the previous run
//! stopped, and carries the batch forward from there:
//!
//! | Stage on entry | Work done |
//! |---|---|
//! | `start` | normalize, render every record, assemble, convert |
//! | `certificate_generation` | normalize, render the missing records, assemble, convert |
//! | `word_document_generation` | normalize, assemble, convert |
//! | `word_document_generated`, `pdf_generation` | convert (assemble first if the document vanished) |
//!
//! The status message for a step is always set before the checkpoint write
//! that enters it. Success removes the checkpoint; any failure leaves it at
//! the last stage reached so the next call resumes there. The staged source
//! sheets are removed on every exit path.
//!
//! Runs and deletes hold an advisory lock file next to the checkpoint, so
//! two processes sharing the same checkpoint cannot overlap.

use crate::checkpoint::{Checkpoint, CheckpointStore, Stage};
use crate::config::{BatchParams, PipelineConfig};
use crate::error::CertError;
use crate::output::{BatchOutput, BatchStats, BatchStatus};
use crate::pipeline::assemble::{self, AssemblyReport};
use crate::pipeline::convert::FormatConverter;
use crate::pipeline::draw::CertificateDrawer;
use crate::pipeline::input::{self, BatchInputs, JsonRowSource, RowSource};
use crate::pipeline::normalize::{self, Record};
use crate::pipeline::render;
use crate::status::StatusReporter;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const STATUS_GENERATING: &str = "Generating certificates...";
pub const STATUS_RESUMING: &str = "Resuming certificate generation...";
pub const STATUS_DOCUMENT: &str = "Generating document...";
pub const STATUS_RESUMING_DOCUMENT: &str = "Resuming document generation...";
pub const STATUS_CONVERTING: &str = "Generating PDF file...";
pub const STATUS_COMPLETED: &str = "Completed";
pub const STATUS_FAILED: &str = "Error generating certificates";

/// Drives certificate batches against one set of working directories.
///
/// # Example
/// ```rust,no_run
/// use certbatch::{
///     BatchInputs, BatchParams, CommandConverter, Pipeline, PipelineConfig, TemplateDrawer,
/// };
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = Pipeline::new(
///     PipelineConfig::default(),
///     Arc::new(TemplateDrawer::new()),
///     Arc::new(CommandConverter::default()),
/// );
/// let output = pipeline
///     .run(
///         &BatchInputs::new("roster.json", "results.json"),
///         &BatchParams::new("MAY 2024", "BACHELOR OF COMMERCE", 6),
///     )
///     .await?;
/// println!("{}", output.output_path.display());
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    drawer: Arc<dyn CertificateDrawer>,
    converter: Arc<dyn FormatConverter>,
    rows: Arc<dyn RowSource>,
    status: StatusReporter,
    busy: AtomicBool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("status", &self.status.get())
            .field("busy", &self.busy.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Held while a run or delete owns the working directories.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, CertError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CertError::BatchInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Pipeline {
    /// Create a pipeline reading JSON row sets.
    pub fn new(
        config: PipelineConfig,
        drawer: Arc<dyn CertificateDrawer>,
        converter: Arc<dyn FormatConverter>,
    ) -> Self {
        Self {
            config,
            drawer,
            converter,
            rows: Arc::new(JsonRowSource),
            status: StatusReporter::new(),
            busy: AtomicBool::new(false),
        }
    }

    /// Replace the tabular reader.
    pub fn with_row_source(mut self, rows: Arc<dyn RowSource>) -> Self {
        self.rows = rows;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The current status message.
    pub fn status(&self) -> String {
        self.status.get()
    }

    /// A handle for polling the status message from another task.
    pub fn status_reporter(&self) -> StatusReporter {
        self.status.clone()
    }

    /// Status message plus what the checkpoint says.
    pub fn batch_status(&self) -> Result<BatchStatus, CertError> {
        let store = self.store();
        let checkpoint = store.load()?;
        Ok(BatchStatus {
            message: self.status.get(),
            stage: checkpoint.stage,
            processed: checkpoint.processed.len(),
            checkpoint_exists: store.exists(),
        })
    }

    /// Run (or resume) a batch.
    ///
    /// # Errors
    /// Input and parameter errors are returned before any checkpoint write.
    /// Later failures leave the checkpoint at the last stage reached.
    /// Returns [`CertError::BatchInProgress`] if this pipeline, or another
    /// process using the same checkpoint, is already running a batch.
    pub async fn run(
        &self,
        inputs: &BatchInputs,
        params: &BatchParams,
    ) -> Result<BatchOutput, CertError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let _lock = self.store().lock()?;

        let result = self.run_batch(inputs, params).await;
        if let Err(ref e) = result {
            warn!("Batch failed: {}", e);
            match e {
                CertError::RecordFailed { source, .. } => self
                    .status
                    .set(format!("Error generating certificate: {source}")),
                _ => self.status.set(STATUS_FAILED),
            }
        }
        result
    }

    /// Remove every generated and staged file and the checkpoint.
    ///
    /// Files that cannot be removed are logged and left behind; only a
    /// checkpoint that cannot be removed is an error.
    pub fn delete_batch(&self) -> Result<(), CertError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let _lock = self.store().lock()?;

        let removed_gen = clear_dir(&self.config.gen_dir);
        let removed_upload = clear_dir(&self.config.upload_dir);
        let had_checkpoint = self.store().remove()?;
        self.status.clear();

        info!(
            "Deleted batch: {} generated, {} staged files (checkpoint {})",
            removed_gen,
            removed_upload,
            if had_checkpoint { "removed" } else { "absent" }
        );
        Ok(())
    }

    fn store(&self) -> CheckpointStore {
        CheckpointStore::new(&self.config.checkpoint_path)
    }

    async fn run_batch(
        &self,
        inputs: &BatchInputs,
        params: &BatchParams,
    ) -> Result<BatchOutput, CertError> {
        let total_start = Instant::now();
        let config = &self.config;

        // ── Step 1: Check parameters against the checkpoint ──────────────────
        params.validate()?;
        let store = self.store();
        let mut checkpoint = store.load()?;
        let resumed_from = checkpoint.stage;
        checkpoint.bind_params(params)?;
        info!(
            "Starting batch {} from stage {} ({} seats already processed)",
            params,
            resumed_from,
            checkpoint.processed.len()
        );

        // ── Step 2: Stage and normalize inputs ───────────────────────────────
        let staged = input::stage_inputs(inputs, &config.upload_dir)?;
        let roster = self.rows.read_rows(&staged.roster)?;
        let results = self.rows.read_rows(&staged.results)?;
        let records = normalize::normalize(&roster, &results)?;

        let mut stats = BatchStats {
            total_records: records.len(),
            ..BatchStats::default()
        };

        // ── Step 3: Render missing certificates ──────────────────────────────
        let mut rendered_now = false;
        if !checkpoint.stage.rendering_complete() {
            if checkpoint.stage == Stage::Start {
                self.status.set(STATUS_GENERATING);
                store.advance(&mut checkpoint, Stage::CertificateGeneration)?;
            } else {
                self.status.set(STATUS_RESUMING);
            }

            let render_start = Instant::now();
            let outcome = render::render_missing(
                &records,
                params,
                config,
                Arc::clone(&self.drawer),
                &store,
                &mut checkpoint,
            )
            .await?;
            stats.rendered = outcome.rendered;
            stats.reused = outcome.reused;
            stats.render_duration_ms = render_start.elapsed().as_millis() as u64;
            info!(
                "Rendered {} certificates in {}ms ({} reused)",
                outcome.rendered, stats.render_duration_ms, outcome.reused
            );

            self.status.set(STATUS_DOCUMENT);
            store.advance(&mut checkpoint, Stage::WordDocumentGeneration)?;
            rendered_now = true;
        } else {
            stats.reused = records.len();
        }

        // ── Step 4: Assemble the document ────────────────────────────────────
        let document_path = config.document_path();
        let report = if checkpoint.stage.document_complete() && document_path.is_file() {
            debug!("Document already assembled, going straight to conversion");
            assemble::assemble(&records, config)
        } else {
            if !rendered_now {
                if checkpoint.stage.document_complete() {
                    warn!(
                        "Document {} is missing, assembling it again",
                        document_path.display()
                    );
                }
                self.status.set(STATUS_RESUMING_DOCUMENT);
                if checkpoint.stage != Stage::WordDocumentGeneration {
                    store.advance(&mut checkpoint, Stage::WordDocumentGeneration)?;
                }
            }

            let assemble_start = Instant::now();
            let report = self.assemble_document(records, &document_path).await?;
            stats.assemble_duration_ms = assemble_start.elapsed().as_millis() as u64;
            store.advance(&mut checkpoint, Stage::WordDocumentGenerated)?;
            report
        };

        if let Some(ref cb) = config.progress_callback {
            cb.on_document_assembled(report.placed, report.skipped.len());
        }
        if !report.skipped.is_empty() {
            warn!(
                "{} certificates were missing from the document: {}",
                report.skipped.len(),
                report.skipped.join(", ")
            );
        }
        stats.pages = report.document.pages();
        stats.skipped_records = report.skipped;

        // ── Step 5: Convert ──────────────────────────────────────────────────
        let output_path = self.convert(&mut checkpoint, &store, &document_path, &mut stats).await?;

        // ── Step 6: Finish ───────────────────────────────────────────────────
        self.status.set(completed_message(&stats));
        store.remove()?;

        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Batch complete: {} certificates on {} pages, {}ms total",
            stats.total_records - stats.skipped_records.len(),
            stats.pages,
            stats.total_duration_ms
        );
        drop(staged);

        Ok(BatchOutput {
            output_path,
            resumed_from,
            stats,
        })
    }

    /// Lay out and write the document on the blocking pool.
    async fn assemble_document(
        &self,
        records: Vec<Record>,
        document_path: &Path,
    ) -> Result<AssemblyReport, CertError> {
        let config = self.config.clone();
        let path = document_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let report = assemble::assemble(&records, &config);
            assemble::write_document(&report.document, &path)?;
            Ok(report)
        })
        .await
        .map_err(|e| CertError::Internal(format!("Assembly task panicked: {e}")))?
    }

    async fn convert(
        &self,
        checkpoint: &mut Checkpoint,
        store: &CheckpointStore,
        document_path: &Path,
        stats: &mut BatchStats,
    ) -> Result<std::path::PathBuf, CertError> {
        self.status.set(STATUS_CONVERTING);
        store.advance(checkpoint, Stage::PdfGeneration)?;

        let convert_start = Instant::now();
        let output_path = self
            .converter
            .convert(document_path, &self.config.output_path())
            .await?;
        stats.convert_duration_ms = convert_start.elapsed().as_millis() as u64;
        info!(
            "Converted to {} in {}ms",
            output_path.display(),
            stats.convert_duration_ms
        );
        Ok(output_path)
    }
}

fn completed_message(stats: &BatchStats) -> String {
    match stats.skipped_records.len() {
        0 => STATUS_COMPLETED.to_string(),
        n => format!("{STATUS_COMPLETED} ({n} certificates missing from the document)"),
    }
}

/// Remove every file under `dir`, returning how many went. Failures are logged.
fn clear_dir(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!("Cannot list {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
        }
    }
    removed
}
