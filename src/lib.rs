//! # certbatch
//!
//! Resumable batch generation of exam-pass certificates.
//!
//! Two result sheets go in (a master roster and the exam results); one PDF
//! with a certificate for every passing candidate comes out. The batch is
//! checkpointed after every certificate, so a run that dies halfway through
//! picks up where it stopped instead of starting over.
//!
//! ## Pipeline Overview
//!
//! ```text
//! roster + results
//!  │
//!  ├─ 1. Stage      copy the sheets into the upload directory
//!  ├─ 2. Normalize  filter passes, join, sort by college, number pages
//!  ├─ 3. Render     one PNG per record, concurrently (spawn_blocking)
//!  ├─ 4. Assemble   two certificates per page, canonical order
//!  ├─ 5. Convert    external helper turns the document into a PDF
//!  └─ 6. Finish     clear the checkpoint, remove the staged sheets
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use certbatch::{
//!     BatchInputs, BatchParams, CommandConverter, Pipeline, PipelineConfig, TemplateDrawer,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .template_path("certificate-template.png")
//!         .build()?;
//!     let pipeline = Pipeline::new(
//!         config,
//!         Arc::new(TemplateDrawer::new()),
//!         Arc::new(CommandConverter::default()),
//!     );
//!     let output = pipeline
//!         .run(
//!             &BatchInputs::new("MS6.json", "BMS.json"),
//!             &BatchParams::new("MAY 2024", "BACHELOR OF MANAGEMENT STUDIES", 6),
//!         )
//!         .await?;
//!     eprintln!(
//!         "{} certificates, {} pages → {}",
//!         output.stats.total_records,
//!         output.stats.pages,
//!         output.output_path.display()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `certbatch` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! certbatch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod status;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use checkpoint::{Checkpoint, CheckpointStore, Stage};
pub use config::{BatchParams, PipelineConfig, PipelineConfigBuilder, RenderPolicy};
pub use error::{CertError, RecordError};
pub use orchestrator::Pipeline;
pub use output::{BatchOutput, BatchStats, BatchStatus};
pub use pipeline::convert::{CommandConverter, FormatConverter};
pub use pipeline::draw::{CertificateDrawer, DrawError, TemplateDrawer};
pub use pipeline::input::{BatchInputs, JsonRowSource, Row, RowSet, RowSource};
pub use pipeline::normalize::Record;
pub use pipeline::text::TextPlacement;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use status::StatusReporter;
