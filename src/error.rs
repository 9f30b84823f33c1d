//! Error types for the certbatch library.
//!
//! Two distinct error types reflect two distinct failure scopes:
//!
//! * [`CertError`] - **Fatal**: the batch cannot finish (unreadable source
//!   sheets, a corrupt checkpoint, the converter crashed). Returned as
//!   `Err(CertError)` from every [`crate::orchestrator::Pipeline`] operation.
//!
//! * [`RecordError`] - **One record**: a single certificate could not be
//!   drawn or written. Whether it aborts the batch is decided by
//!   [`crate::config::RenderPolicy`]; under `BestEffort` the failures are
//!   collected and reported together in [`CertError::RecordsFailed`].
//!
//! Variants are grouped by when they can occur. Input errors always happen
//! before the checkpoint is touched; everything after them leaves the
//! checkpoint at the last committed stage so a rerun resumes there.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the certbatch library.
#[derive(Debug, Error)]
pub enum CertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A source sheet was not found at the given path.
    #[error("Source file not found: '{path}'\nCheck the path exists and is readable.")]
    SourceNotFound { path: PathBuf },

    /// A source sheet was read but could not be parsed into rows.
    #[error("Failed to parse rows from '{path}': {detail}")]
    SourceParse { path: PathBuf, detail: String },

    /// A row is missing a column the normalizer cannot do without.
    #[error("Row {row} of '{sheet}' has no '{column}' column")]
    MissingColumn {
        sheet: String,
        row: usize,
        column: String,
    },

    /// Two passing rows share a seat number, which names the artifact file.
    #[error("Seat number '{seat_no}' appears more than once among passing rows")]
    DuplicateSeat { seat_no: String },

    // ── Render errors ─────────────────────────────────────────────────────
    /// One record failed and the render policy is fail-fast.
    #[error("Certificate for seat {seat_no} failed: {source}")]
    RecordFailed {
        seat_no: String,
        #[source]
        source: RecordError,
    },

    /// Best-effort rendering finished with failures; assembly was not attempted.
    #[error("{failed}/{attempted} certificates failed to render.\nFirst error: {first_error}")]
    RecordsFailed {
        failed: usize,
        attempted: usize,
        first_error: String,
        errors: Vec<RecordError>,
    },

    // ── Assembly errors ───────────────────────────────────────────────────
    /// Writing the assembled document failed.
    #[error("Failed to write document '{path}': {source}")]
    DocumentWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document was reported written but is not on disk.
    #[error("Document not found at '{path}' after assembly")]
    DocumentMissing { path: PathBuf },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The external converter could not be started or exited unsuccessfully.
    #[error("Converting '{document}' failed: {detail}")]
    ConversionFailed { document: PathBuf, detail: String },

    /// The converter exited cleanly but produced no output file.
    #[error("Converter reported success but '{path}' does not exist")]
    ConverterOutputMissing { path: PathBuf },

    // ── Checkpoint errors ─────────────────────────────────────────────────
    /// Reading, writing, or removing the checkpoint file failed.
    #[error("Checkpoint I/O on '{path}': {source}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint file exists but is not a valid checkpoint.
    #[error("Checkpoint '{path}' is corrupt: {detail}\nRun `certbatch delete` to start over.")]
    CheckpointCorrupt { path: PathBuf, detail: String },

    /// A resumed run was given different batch parameters than the run it continues.
    #[error(
        "Batch parameters differ from the interrupted run (checkpoint has {expected}, got {actual}).\n\
Re-run with the original values or run `certbatch delete` to discard progress."
    )]
    ParameterMismatch { expected: String, actual: String },

    // ── Other I/O ─────────────────────────────────────────────────────────
    /// A working directory could not be created or cleared.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation or batch parameter validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Another batch is already running against the same checkpoint.
    #[error(
        "A batch is already in progress for this checkpoint; wait for it to finish.\n\
If no certbatch process is running, remove the stale '<checkpoint>.lock' file."
    )]
    BatchInProgress,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// An error confined to a single record.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum RecordError {
    /// The record carries neither a `CGPA` nor a `GRADE` column.
    #[error("Seat {seat_no}: record has neither CGPA nor GRADE")]
    NoScore { seat_no: String },

    /// The certificate template could not be loaded.
    #[error("Template '{path}' could not be loaded: {detail}")]
    TemplateLoad { path: String, detail: String },

    /// The drawing primitive failed.
    #[error("Seat {seat_no}: drawing failed: {detail}")]
    DrawFailed { seat_no: String, detail: String },

    /// The rendered artifact could not be written.
    #[error("Seat {seat_no}: writing '{path}' failed: {detail}")]
    WriteFailed {
        seat_no: String,
        path: String,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_failed_display() {
        let e = CertError::RecordsFailed {
            failed: 2,
            attempted: 10,
            first_error: "Seat 101: drawing failed: boom".into(),
            errors: vec![],
        };
        let msg = e.to_string();
        assert!(msg.contains("2/10"), "got: {msg}");
        assert!(msg.contains("boom"), "got: {msg}");
    }

    #[test]
    fn record_failed_carries_source() {
        let e = CertError::RecordFailed {
            seat_no: "1001".into(),
            source: RecordError::NoScore {
                seat_no: "1001".into(),
            },
        };
        assert!(e.to_string().contains("1001"));
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn parameter_mismatch_display() {
        let e = CertError::ParameterMismatch {
            expected: "2024/B.COM/6".into(),
            actual: "2024/B.COM/5".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("2024/B.COM/6"));
        assert!(msg.contains("certbatch delete"));
    }

    #[test]
    fn record_error_round_trips_through_json() {
        let e = RecordError::DrawFailed {
            seat_no: "7".into(),
            detail: "glyph".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: RecordError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), e.to_string());
    }
}
