//! Configuration types for a certificate batch.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The per-batch inputs that end up printed on
//! every certificate live separately in [`BatchParams`] because they are
//! supplied per run and persisted in the checkpoint, while the config
//! describes the installation (directories, template, worker count).

use crate::error::CertError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for the certificate pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use certbatch::{PipelineConfig, RenderPolicy};
///
/// let config = PipelineConfig::builder()
///     .gen_dir("/var/lib/certs/gens")
///     .concurrency(4)
///     .render_policy(RenderPolicy::BestEffort)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory receiving one `{seat_no}.png` per record, the assembled
    /// document and the final PDF. Default: `gens`.
    pub gen_dir: PathBuf,

    /// Directory the source sheets are staged into for the duration of a run.
    /// Default: `uploads`.
    pub upload_dir: PathBuf,

    /// Checkpoint file. Default: `checkpoint.json`.
    pub checkpoint_path: PathBuf,

    /// Certificate background image every record is drawn onto.
    /// Default: `certificate-template.png`.
    pub template_path: PathBuf,

    /// Number of certificates rendered at once. Default: 10.
    ///
    /// Drawing is CPU-bound and runs on the blocking pool, so values above
    /// the core count mostly add memory pressure (each worker holds a full
    /// decoded template).
    pub concurrency: usize,

    /// What to do when a single record fails to render. Default: [`RenderPolicy::FailFast`].
    pub render_policy: RenderPolicy,

    /// File name of the assembled document inside `gen_dir`. Default: `certificates.html`.
    pub document_name: String,

    /// File name of the converted output inside `gen_dir`. Default: `certificates.pdf`.
    pub output_name: String,

    /// Optional per-record progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gen_dir: PathBuf::from("gens"),
            upload_dir: PathBuf::from("uploads"),
            checkpoint_path: PathBuf::from("checkpoint.json"),
            template_path: PathBuf::from("certificate-template.png"),
            concurrency: 10,
            render_policy: RenderPolicy::default(),
            document_name: "certificates.html".to_string(),
            output_name: "certificates.pdf".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("gen_dir", &self.gen_dir)
            .field("upload_dir", &self.upload_dir)
            .field("checkpoint_path", &self.checkpoint_path)
            .field("template_path", &self.template_path)
            .field("concurrency", &self.concurrency)
            .field("render_policy", &self.render_policy)
            .field("document_name", &self.document_name)
            .field("output_name", &self.output_name)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Path of the artifact for one seat number.
    pub fn artifact_path(&self, seat_no: &str) -> PathBuf {
        self.gen_dir.join(format!("{seat_no}.png"))
    }

    /// Path of the assembled document.
    pub fn document_path(&self) -> PathBuf {
        self.gen_dir.join(&self.document_name)
    }

    /// Path of the converted output.
    pub fn output_path(&self) -> PathBuf {
        self.gen_dir.join(&self.output_name)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn gen_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.gen_dir = dir.into();
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_path = path.into();
        self
    }

    pub fn template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.template_path = path.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn render_policy(mut self, policy: RenderPolicy) -> Self {
        self.config.render_policy = policy;
        self
    }

    pub fn document_name(mut self, name: impl Into<String>) -> Self {
        self.config.document_name = name.into();
        self
    }

    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.config.output_name = name.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, CertError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(CertError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.document_name.trim().is_empty() || c.output_name.trim().is_empty() {
            return Err(CertError::InvalidConfig(
                "Document and output names must not be empty".into(),
            ));
        }
        if c.document_name == c.output_name {
            return Err(CertError::InvalidConfig(format!(
                "Document and output must have different names, both are '{}'",
                c.document_name
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How a single failed record affects the rest of the batch.
///
/// | Policy | Behaviour |
/// |--------|-----------|
/// | `FailFast` | Stop scheduling renders at the first failure and fail the run (default) |
/// | `BestEffort` | Render every record, then fail the run listing all failures |
///
/// Neither policy assembles a document with holes in it: a failed record is
/// never committed to the checkpoint, so the next run retries exactly the
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderPolicy {
    #[default]
    FailFast,
    BestEffort,
}

/// The per-batch values printed on every certificate.
///
/// Persisted in the checkpoint so a resumed run can be checked against the
/// run it continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchParams {
    /// Exam session year as printed, e.g. `"2024"` or `"MAY 2024"`.
    pub year: String,
    /// Course name as printed, e.g. `"B.COM"`.
    pub course_name: String,
    /// Semester number, printed as a Roman numeral.
    pub semester: u32,
}

impl BatchParams {
    pub fn new(year: impl Into<String>, course_name: impl Into<String>, semester: u32) -> Self {
        Self {
            year: year.into(),
            course_name: course_name.into(),
            semester,
        }
    }

    /// Reject parameters that cannot produce valid certificate text.
    pub fn validate(&self) -> Result<(), CertError> {
        if self.year.trim().is_empty() {
            return Err(CertError::InvalidConfig("Year must not be empty".into()));
        }
        if self.course_name.trim().is_empty() {
            return Err(CertError::InvalidConfig("Course name must not be empty".into()));
        }
        if !(1..=3999).contains(&self.semester) {
            return Err(CertError::InvalidConfig(format!(
                "Semester must be 1–3999, got {}",
                self.semester
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BatchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.year, self.course_name, self.semester)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_layout() {
        let c = PipelineConfig::default();
        assert_eq!(c.concurrency, 10);
        assert_eq!(c.render_policy, RenderPolicy::FailFast);
        assert_eq!(c.document_path(), PathBuf::from("gens/certificates.html"));
        assert_eq!(c.output_path(), PathBuf::from("gens/certificates.pdf"));
        assert_eq!(c.artifact_path("123"), PathBuf::from("gens/123.png"));
    }

    #[test]
    fn concurrency_is_clamped_to_one() {
        let c = PipelineConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn same_document_and_output_name_rejected() {
        let err = PipelineConfig::builder()
            .document_name("out.pdf")
            .output_name("out.pdf")
            .build()
            .unwrap_err();
        assert!(matches!(err, CertError::InvalidConfig(_)));
    }

    #[test]
    fn batch_params_validation() {
        assert!(BatchParams::new("2024", "B.COM", 6).validate().is_ok());
        assert!(BatchParams::new("2024", "B.COM", 0).validate().is_err());
        assert!(BatchParams::new("2024", "B.COM", 4000).validate().is_err());
        assert!(BatchParams::new(" ", "B.COM", 1).validate().is_err());
        assert!(BatchParams::new("2024", "", 1).validate().is_err());
    }

    #[test]
    fn batch_params_display() {
        assert_eq!(BatchParams::new("2024", "B.COM", 6).to_string(), "2024/B.COM/6");
    }
}
