//! Record rendering: draw every certificate that is not already on disk.
//!
//! ## Concurrency model
//!
//! Each record becomes one `spawn_blocking` task (drawing and PNG encoding
//! are CPU-bound), driven through `buffer_unordered(concurrency)`. Results
//! are consumed on the calling task, which is the only writer of the
//! checkpoint: a seat is appended and persisted as soon as its render
//! completes, before the next completion is looked at.
//!
//! ## Commit point
//!
//! The artifact is written first (temp file + rename), the checkpoint
//! append second. A crash between the two re-renders that one record on the
//! next run; a crash after the append never does.
//!
//! Under [`RenderPolicy::FailFast`] the first failure stops new renders from
//! starting, but renders already in flight are drained and committed, so
//! nothing that was drawn has to be drawn again.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::{BatchParams, PipelineConfig, RenderPolicy};
use crate::error::{CertError, RecordError};
use crate::pipeline::draw::{CertificateDrawer, DrawError};
use crate::pipeline::normalize::Record;
use crate::pipeline::text::{self, CertificateText};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a render pass did.
#[derive(Debug, Clone, Default)]
pub struct RenderOutcome {
    /// Certificates drawn in this pass.
    pub rendered: usize,
    /// Certificates already committed by an earlier run and present on disk.
    pub reused: usize,
}

/// Records that still need an artifact.
///
/// A seat is done only when it is in the checkpoint AND its file exists; a
/// checkpointed seat whose file vanished is rendered again.
pub fn pending_records<'a>(
    records: &'a [Record],
    checkpoint: &Checkpoint,
    config: &PipelineConfig,
) -> Vec<&'a Record> {
    records
        .iter()
        .filter(|r| {
            if !checkpoint.is_processed(&r.seat_no) {
                return true;
            }
            let exists = config.artifact_path(&r.seat_no).is_file();
            if !exists {
                warn!(
                    "Seat {} is checkpointed but its certificate is missing; rendering again",
                    r.seat_no
                );
            }
            !exists
        })
        .collect()
}

/// Render every pending record, committing each success to the checkpoint.
pub async fn render_missing(
    records: &[Record],
    params: &BatchParams,
    config: &PipelineConfig,
    drawer: Arc<dyn CertificateDrawer>,
    store: &CheckpointStore,
    checkpoint: &mut Checkpoint,
) -> Result<RenderOutcome, CertError> {
    let pending: Vec<Record> = pending_records(records, checkpoint, config)
        .into_iter()
        .cloned()
        .collect();
    let reused = records.len() - pending.len();
    let to_render = pending.len();

    info!(
        "Rendering {} certificates ({} reused from checkpoint)",
        to_render, reused
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_render_start(records.len(), reused);
    }

    std::fs::create_dir_all(&config.gen_dir).map_err(|e| CertError::Io {
        path: config.gen_dir.clone(),
        source: e,
    })?;

    // One date for the whole batch, even if it runs past midnight.
    let issue_date = text::today();
    let template = config.template_path.clone();

    let stop = AtomicBool::new(false);
    let stop = &stop;

    let mut results = stream::iter(pending.into_iter().map(|record| {
        let drawer = Arc::clone(&drawer);
        let params = params.clone();
        let issue_date = issue_date.clone();
        let template = template.clone();
        let out_path = config.artifact_path(&record.seat_no);
        async move {
            let seat_no = record.seat_no.clone();
            if stop.load(Ordering::SeqCst) {
                return (seat_no, None);
            }
            let task = tokio::task::spawn_blocking(move || {
                render_one(&record, &params, &issue_date, &template, &out_path, &*drawer)
            });
            let result = match task.await {
                Ok(r) => r,
                Err(e) => Err(RecordError::DrawFailed {
                    seat_no: seat_no.clone(),
                    detail: format!("render task panicked: {e}"),
                }),
            };
            (seat_no, Some(result))
        }
    }))
    .buffer_unordered(config.concurrency);

    let mut done = 0usize;
    let mut first_failure: Option<(String, RecordError)> = None;
    let mut failures: Vec<RecordError> = Vec::new();

    while let Some((seat_no, result)) = results.next().await {
        let Some(result) = result else {
            continue;
        };
        match result {
            Ok(()) => {
                store.append_processed(checkpoint, &seat_no)?;
                done += 1;
                debug!("Committed seat {} ({}/{})", seat_no, done, to_render);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_record_complete(&seat_no, done, to_render);
                }
            }
            Err(e) => {
                warn!("Seat {} failed: {}", seat_no, e);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_record_error(&seat_no, &e.to_string());
                }
                match config.render_policy {
                    RenderPolicy::FailFast => {
                        stop.store(true, Ordering::SeqCst);
                        if first_failure.is_none() {
                            first_failure = Some((seat_no, e));
                        }
                    }
                    RenderPolicy::BestEffort => failures.push(e),
                }
            }
        }
    }

    if let Some((seat_no, source)) = first_failure {
        return Err(CertError::RecordFailed { seat_no, source });
    }
    if let Some(first) = failures.first() {
        return Err(CertError::RecordsFailed {
            failed: failures.len(),
            attempted: to_render,
            first_error: first.to_string(),
            errors: failures,
        });
    }

    Ok(RenderOutcome {
        rendered: done,
        reused,
    })
}

/// Derive, draw and write one certificate. Runs on the blocking pool.
fn render_one(
    record: &Record,
    params: &BatchParams,
    issue_date: &str,
    template: &Path,
    out_path: &Path,
    drawer: &dyn CertificateDrawer,
) -> Result<(), RecordError> {
    let text = CertificateText::derive(record, params, issue_date)?;

    let png = drawer
        .draw(template, &text.placements())
        .map_err(|e| match e {
            DrawError::Template { path, detail } => RecordError::TemplateLoad {
                path: path.display().to_string(),
                detail,
            },
            DrawError::Render(detail) => RecordError::DrawFailed {
                seat_no: record.seat_no.clone(),
                detail,
            },
        })?;

    write_artifact(out_path, &png).map_err(|e| RecordError::WriteFailed {
        seat_no: record.seat_no.clone(),
        path: out_path.display().to_string(),
        detail: e.to_string(),
    })?;

    debug!("Generated certificate: {}", out_path.display());
    Ok(())
}

/// Write `bytes` so that `path` either does not exist or is complete.
fn write_artifact(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = PathBuf::from(path);
    tmp.as_mut_os_string().push(".tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
