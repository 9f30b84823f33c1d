//! Document → distributable format conversion.
//!
//! The pipeline only knows the [`FormatConverter`] seam: a document path in,
//! the output path back, or an error. [`CommandConverter`] is the stock
//! implementation and shells out to an external helper (by default
//! `wkhtmltopdf`), so the core runs anywhere that helper is installed.

use crate::error::CertError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Converts an assembled document into the final artifact.
#[async_trait]
pub trait FormatConverter: Send + Sync {
    /// Produce `output` from `document` and return its path.
    async fn convert(&self, document: &Path, output: &Path) -> Result<PathBuf, CertError>;
}

/// Runs an external program, substituting `{input}` and `{output}` in its
/// arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConverter {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for CommandConverter {
    fn default() -> Self {
        Self {
            program: "wkhtmltopdf".to_string(),
            args: vec!["--quiet".into(), "{input}".into(), "{output}".into()],
        }
    }
}

impl CommandConverter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn expand_args(&self, document: &Path, output: &Path) -> Vec<String> {
        let input = document.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl FormatConverter for CommandConverter {
    async fn convert(&self, document: &Path, output: &Path) -> Result<PathBuf, CertError> {
        let failed = |detail: String| CertError::ConversionFailed {
            document: document.to_path_buf(),
            detail,
        };

        // A leftover from an earlier run must not pass the existence check.
        match tokio::fs::remove_file(output).await {
            Ok(()) => debug!("Removed stale output {}", output.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(failed(format!("cannot replace '{}': {e}", output.display()))),
        }

        let args = self.expand_args(document, output);
        info!("Converting {} with {}", document.display(), self.program);
        debug!("Converter command: {} {:?}", self.program, args);

        let result = tokio::process::Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| failed(format!("cannot start '{}': {e}", self.program)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stderr = stderr.trim();
            return Err(failed(if stderr.is_empty() {
                format!("'{}' exited with {}", self.program, result.status)
            } else {
                format!("'{}' exited with {}: {stderr}", self.program, result.status)
            }));
        }

        if !output.is_file() {
            return Err(CertError::ConverterOutputMissing {
                path: output.to_path_buf(),
            });
        }
        Ok(output.to_path_buf())
    }
}
