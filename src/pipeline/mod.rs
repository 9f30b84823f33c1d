//! Pipeline stages for certificate batches.
//!
//! Each submodule implements exactly one transformation step; the
//! orchestrator decides which of them a given run needs.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ text ──▶ draw ──▶ render ──▶ assemble ──▶ convert
//! (sheets)  (records)   (wording) (pixels) (fan-out)  (pages)     (PDF)
//! ```
//!
//! 1. [`input`]     - stage the source sheets and parse them into rows
//! 2. [`normalize`] - filter, join, sort and number the passing rows
//! 3. [`text`]      - derive the printed wording and its fixed placements
//! 4. [`draw`]      - stamp the wording onto the template; pure, CPU-bound
//! 5. [`render`]    - run `draw` for every missing record on the blocking
//!    pool and commit each result to the checkpoint
//! 6. [`assemble`]  - lay the artifacts out two per page, in canonical order
//! 7. [`convert`]   - hand the document to an external converter

pub mod assemble;
pub mod convert;
pub mod draw;
pub mod input;
pub mod normalize;
pub mod render;
pub mod text;
