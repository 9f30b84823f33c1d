//! Input staging: copy the two source sheets into the upload directory and
//! parse them into row sets.
//!
//! ## Why stage at all?
//!
//! The staged copies are what the run actually reads, and they are removed
//! on every exit path by [`StagedInputs`]'s `Drop`, success or failure. The
//! caller's originals are never touched, and the upload directory only ever
//! holds the sheets of the batch currently running.

use crate::error::CertError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One spreadsheet row: column name → cell value.
pub type Row = serde_json::Map<String, Value>;

/// All rows of one sheet, in file order.
pub type RowSet = Vec<Row>;

/// Parses a source sheet into rows.
///
/// The tabular format is pluggable; [`JsonRowSource`] is the built-in reader.
pub trait RowSource: Send + Sync {
    fn read_rows(&self, path: &Path) -> Result<RowSet, CertError>;
}

/// Reads a JSON array of objects, or JSON Lines with one object per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRowSource;

impl RowSource for JsonRowSource {
    fn read_rows(&self, path: &Path) -> Result<RowSet, CertError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CertError::SourceNotFound {
                path: path.to_path_buf(),
            },
            _ => CertError::SourceParse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            },
        })?;
        parse_rows(&text).map_err(|detail| CertError::SourceParse {
            path: path.to_path_buf(),
            detail,
        })
    }
}

fn parse_rows(text: &str) -> Result<RowSet, String> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
        return values
            .into_iter()
            .enumerate()
            .map(|(i, v)| into_row(v, i + 1))
            .collect();
    }

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let v: Value =
                serde_json::from_str(line).map_err(|e| format!("line {}: {e}", i + 1))?;
            into_row(v, i + 1)
        })
        .collect()
}

fn into_row(value: Value, position: usize) -> Result<Row, String> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(format!(
            "row {position} is not an object (found {})",
            json_kind(&other)
        )),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The caller-supplied source sheets of one batch.
#[derive(Debug, Clone)]
pub struct BatchInputs {
    /// Master roster (contributes the college-number key).
    pub roster: PathBuf,
    /// Exam results (status, remarks, sex code, scores).
    pub results: PathBuf,
}

impl BatchInputs {
    pub fn new(roster: impl Into<PathBuf>, results: impl Into<PathBuf>) -> Self {
        Self {
            roster: roster.into(),
            results: results.into(),
        }
    }
}

/// Staged copies of the source sheets, removed when dropped.
#[derive(Debug)]
pub struct StagedInputs {
    pub roster: PathBuf,
    pub results: PathBuf,
    staged: Vec<PathBuf>,
}

impl Drop for StagedInputs {
    fn drop(&mut self) {
        for path in &self.staged {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed staged input {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove staged input {}: {}", path.display(), e),
            }
        }
    }
}

/// Copy both sheets into `upload_dir`.
///
/// If the second copy fails the first is removed before returning.
pub fn stage_inputs(inputs: &BatchInputs, upload_dir: &Path) -> Result<StagedInputs, CertError> {
    std::fs::create_dir_all(upload_dir).map_err(|e| CertError::Io {
        path: upload_dir.to_path_buf(),
        source: e,
    })?;

    let mut staged = StagedInputs {
        roster: upload_dir.join("roster.json"),
        results: upload_dir.join("results.json"),
        staged: Vec::with_capacity(2),
    };

    let pairs = [
        (inputs.roster.clone(), staged.roster.clone()),
        (inputs.results.clone(), staged.results.clone()),
    ];
    for (src, dest) in pairs {
        if !src.is_file() {
            return Err(CertError::SourceNotFound { path: src });
        }
        // A sheet already sitting at its staged path belongs to the caller.
        if same_file(&src, &dest) {
            continue;
        }
        std::fs::copy(&src, &dest).map_err(|e| CertError::Io {
            path: dest.clone(),
            source: e,
        })?;
        staged.staged.push(dest);
    }

    debug!("Staged inputs into {}", upload_dir.display());
    Ok(staged)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_json_array() {
        let rows = parse_rows(r#"[{"SEAT_NO": 1}, {"SEAT_NO": 2}]"#).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["SEAT_NO"], 2);
    }

    #[test]
    fn parses_json_lines_skipping_blanks() {
        let rows = parse_rows("{\"A\": 1}\n\n{\"A\": 2}\n").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn rejects_non_object_rows() {
        let err = parse_rows("[1, 2]").unwrap_err();
        assert!(err.contains("row 1"), "got: {err}");
        assert!(err.contains("a number"), "got: {err}");
    }

    #[test]
    fn reports_bad_json_line() {
        let err = parse_rows("{\"A\": 1}\n{oops}\n").unwrap_err();
        assert!(err.starts_with("line 2"), "got: {err}");
    }

    #[test]
    fn missing_source_file() {
        let err = JsonRowSource
            .read_rows(Path::new("/definitely/not/here.json"))
            .unwrap_err();
        assert!(matches!(err, CertError::SourceNotFound { .. }));
    }

    #[test]
    fn staged_copies_removed_on_drop() {
        let src = TempDir::new().unwrap();
        let uploads = TempDir::new().unwrap();
        let roster = src.path().join("ms6.json");
        let results = src.path().join("bms.json");
        std::fs::write(&roster, "[]").unwrap();
        std::fs::write(&results, "[]").unwrap();

        let staged = stage_inputs(&BatchInputs::new(&roster, &results), uploads.path()).unwrap();
        assert!(staged.roster.exists());
        assert!(staged.results.exists());
        drop(staged);

        assert_eq!(std::fs::read_dir(uploads.path()).unwrap().count(), 0);
        assert!(roster.exists(), "originals must survive");
        assert!(results.exists(), "originals must survive");
    }

    #[test]
    fn partial_staging_is_cleaned_up() {
        let src = TempDir::new().unwrap();
        let uploads = TempDir::new().unwrap();
        let roster = src.path().join("ms6.json");
        std::fs::write(&roster, "[]").unwrap();

        let err = stage_inputs(
            &BatchInputs::new(&roster, src.path().join("missing.json")),
            uploads.path(),
        )
        .unwrap_err();
        assert!(matches!(err, CertError::SourceNotFound { .. }));
        assert_eq!(std::fs::read_dir(uploads.path()).unwrap().count(), 0);
    }

    #[test]
    fn source_already_in_upload_dir_is_left_alone() {
        let uploads = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let roster = uploads.path().join("roster.json");
        let results = other.path().join("bms.json");
        std::fs::write(&roster, "[{\"COLL_NO\": 1}]").unwrap();
        std::fs::write(&results, "[]").unwrap();

        let staged = stage_inputs(&BatchInputs::new(&roster, &results), uploads.path()).unwrap();
        assert_eq!(staged.roster, roster);
        drop(staged);

        assert!(roster.exists(), "caller's sheet must survive");
        assert!(!uploads.path().join("results.json").exists());
        assert!(results.exists());
    }
}
