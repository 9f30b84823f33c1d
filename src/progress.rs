//! Progress-callback trait for per-record pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the renderer works through the batch.
//!
//! The coarse "what is the pipeline doing" message lives in
//! [`crate::status::StatusReporter`]; this trait carries the fine-grained
//! per-record events a progress bar needs.
//!
//! # Example
//!
//! ```rust
//! use certbatch::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_record_complete(&self, seat_no: &str, done: usize, total: usize) {
//!         self.rendered.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{seat_no} ({done}/{total})");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { rendered: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it renders and assembles a batch.
///
/// Implementations must be `Send + Sync`. Record events are delivered from
/// the orchestrating task as renders complete, so they arrive in completion
/// order, not in canonical order. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once before rendering starts.
    ///
    /// # Arguments
    /// * `total`    - records in the canonical set
    /// * `reusable` - records already rendered by an earlier run
    fn on_render_start(&self, total: usize, reusable: usize) {
        let _ = (total, reusable);
    }

    /// Called after a record's artifact is written and committed to the checkpoint.
    ///
    /// # Arguments
    /// * `seat_no` - the record's identifier
    /// * `done`    - records rendered so far in this run
    /// * `total`   - records this run has to render
    fn on_record_complete(&self, seat_no: &str, done: usize, total: usize) {
        let _ = (seat_no, done, total);
    }

    /// Called when a record fails to render.
    fn on_record_error(&self, seat_no: &str, error: &str) {
        let _ = (seat_no, error);
    }

    /// Called once the document is assembled.
    ///
    /// # Arguments
    /// * `placed`  - artifacts placed in the document
    /// * `skipped` - records whose artifact was missing at assembly time
    fn on_document_assembled(&self, placed: usize, skipped: usize) {
        let _ = (placed, skipped);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
