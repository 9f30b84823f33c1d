//! Result types returned by [`crate::orchestrator::Pipeline`].

use crate::checkpoint::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A successfully completed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    /// The converted document (e.g. `gens/certificates.pdf`).
    pub output_path: PathBuf,
    /// Stage the run resumed from; [`Stage::Start`] for a fresh batch.
    pub resumed_from: Stage,
    pub stats: BatchStats,
}

/// Counters and timings for one `run` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    /// Records in the canonical set after filtering.
    pub total_records: usize,
    /// Certificates drawn during this run.
    pub rendered: usize,
    /// Certificates reused from an earlier, interrupted run.
    pub reused: usize,
    /// Records with no artifact on disk at assembly time.
    pub skipped_records: Vec<String>,
    /// Pages in the assembled document.
    pub pages: usize,
    pub render_duration_ms: u64,
    pub assemble_duration_ms: u64,
    pub convert_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Snapshot answered by the status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    /// Latest status message of this process; empty when idle.
    pub message: String,
    /// Persisted stage; [`Stage::Start`] when there is no checkpoint.
    pub stage: Stage,
    /// Seats recorded in the checkpoint.
    pub processed: usize,
    pub checkpoint_exists: bool,
}
