//! Durable batch progress: which seats are rendered and which stage is next.
//!
//! The checkpoint is a small JSON document:
//!
//! ```json
//! {
//!   "processed_seat_numbers": ["1001", "1002"],
//!   "step": "certificate_generation",
//!   "params": { "year": "2024", "course_name": "B.COM", "semester": 6 }
//! }
//! ```
//!
//! It is read entirely into memory and rewritten entirely on every update.
//! Writes go to a temp file in the same directory which is then renamed over
//! the old checkpoint, so a crash mid-write leaves the previous valid state
//! in place. No checkpoint file means [`Stage::Start`].

use crate::config::BatchParams;
use crate::error::CertError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Pipeline stage, persisted as the checkpoint's `step`.
///
/// Ordered: a later stage implies every earlier stage completed. There is no
/// terminal variant; success removes the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Start,
    CertificateGeneration,
    WordDocumentGeneration,
    WordDocumentGenerated,
    PdfGeneration,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::CertificateGeneration => "certificate_generation",
            Stage::WordDocumentGeneration => "word_document_generation",
            Stage::WordDocumentGenerated => "word_document_generated",
            Stage::PdfGeneration => "pdf_generation",
        }
    }

    /// Whether every record was rendered before this stage was persisted.
    pub fn rendering_complete(self) -> bool {
        self >= Stage::WordDocumentGeneration
    }

    /// Whether the document was assembled before this stage was persisted.
    pub fn document_complete(self) -> bool {
        self >= Stage::WordDocumentGenerated
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory image of the checkpoint file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Seats whose artifact was written. Only ever grows during a batch.
    #[serde(rename = "processed_seat_numbers", default)]
    pub processed: BTreeSet<String>,

    #[serde(rename = "step", default)]
    pub stage: Stage,

    /// Parameters of the run that created this checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<BatchParams>,
}

impl Checkpoint {
    pub fn is_processed(&self, seat_no: &str) -> bool {
        self.processed.contains(seat_no)
    }

    /// Check `params` against the run that created this checkpoint.
    ///
    /// A checkpoint without parameters adopts the supplied ones.
    pub fn bind_params(&mut self, params: &BatchParams) -> Result<(), CertError> {
        match &self.params {
            Some(existing) if existing != params => Err(CertError::ParameterMismatch {
                expected: existing.to_string(),
                actual: params.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.params = Some(params.clone());
                Ok(())
            }
        }
    }
}

/// Reads and atomically rewrites the checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the checkpoint, or a fresh `start` checkpoint if none exists.
    pub fn load(&self) -> Result<Checkpoint, CertError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No checkpoint at {}, starting fresh", self.path.display());
                return Ok(Checkpoint::default());
            }
            Err(e) => {
                return Err(CertError::CheckpointIo {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| CertError::CheckpointCorrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })
    }

    /// Replace the checkpoint file with `checkpoint`.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CertError> {
        let io_err = |source| CertError::CheckpointIo {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| CertError::Internal(format!("checkpoint serialisation: {e}")))?;

        // The temp file must live on the same filesystem for the rename to be atomic.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!(
            stage = %checkpoint.stage,
            processed = checkpoint.processed.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Record one more rendered seat and persist.
    pub fn append_processed(
        &self,
        checkpoint: &mut Checkpoint,
        seat_no: &str,
    ) -> Result<(), CertError> {
        checkpoint.processed.insert(seat_no.to_string());
        if checkpoint.stage < Stage::CertificateGeneration {
            checkpoint.stage = Stage::CertificateGeneration;
        }
        self.save(checkpoint)
    }

    /// Move to `stage` and persist.
    pub fn advance(&self, checkpoint: &mut Checkpoint, stage: Stage) -> Result<(), CertError> {
        checkpoint.stage = stage;
        self.save(checkpoint)
    }

    /// Delete the checkpoint file. Returns `false` if there was none.
    pub fn remove(&self) -> Result<bool, CertError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CertError::CheckpointIo {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Path of the advisory lock file, next to the checkpoint.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the cross-process batch lock.
    ///
    /// The lock file holds the owner's pid. A lock left behind by a process
    /// that no longer exists is taken over; where liveness cannot be checked
    /// the lock is treated as held.
    pub fn lock(&self) -> Result<BatchLock, CertError> {
        let path = self.lock_path();
        let io_err = |source| CertError::CheckpointIo {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }

        for _ in 0..2 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id()).map_err(io_err)?;
                    debug!("Took batch lock {}", path.display());
                    return Ok(BatchLock { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if !lock_is_stale(&path) {
                        return Err(CertError::BatchInProgress);
                    }
                    warn!("Removing stale batch lock {}", path.display());
                    match std::fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(io_err(e)),
                    }
                }
                Err(e) => return Err(io_err(e)),
            }
        }
        Err(CertError::BatchInProgress)
    }
}

/// Removes the lock file when dropped.
#[derive(Debug)]
pub struct BatchLock {
    path: PathBuf,
}

impl BatchLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BatchLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release batch lock {}: {}", self.path.display(), e);
        }
    }
}

fn lock_is_stale(path: &Path) -> bool {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(pid) = raw.trim().parse::<u32>() else {
        // Half-written by an owner that is still starting up.
        return false;
    };
    if pid == std::process::id() {
        return false;
    }
    let proc_root = Path::new("/proc");
    proc_root.is_dir() && !proc_root.join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::new(dir.path().join("checkpoint.json"))
    }

    #[test]
    fn missing_file_is_start() {
        let dir = TempDir::new().unwrap();
        let cp = store(&dir).load().unwrap();
        assert_eq!(cp.stage, Stage::Start);
        assert!(cp.processed.is_empty());
        assert!(cp.params.is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let mut cp = Checkpoint::default();
        s.append_processed(&mut cp, "1002").unwrap();
        s.append_processed(&mut cp, "1001").unwrap();
        s.append_processed(&mut cp, "1001").unwrap();

        let loaded = s.load().unwrap();
        assert_eq!(loaded.stage, Stage::CertificateGeneration);
        assert_eq!(loaded.processed.len(), 2);
        assert!(loaded.is_processed("1001"));
    }

    #[test]
    fn file_layout_uses_wire_field_names() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let mut cp = Checkpoint::default();
        s.append_processed(&mut cp, "42").unwrap();
        s.advance(&mut cp, Stage::WordDocumentGenerated).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(s.path()).unwrap()).unwrap();
        assert_eq!(raw["step"], "word_document_generated");
        assert_eq!(raw["processed_seat_numbers"][0], "42");
        assert!(raw.get("params").is_none());
    }

    #[test]
    fn reads_checkpoint_without_params() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        std::fs::write(
            s.path(),
            r#"{"processed_seat_numbers": ["7", "8"], "step": "pdf_generation"}"#,
        )
        .unwrap();
        let cp = s.load().unwrap();
        assert_eq!(cp.stage, Stage::PdfGeneration);
        assert!(cp.stage.document_complete());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        std::fs::write(s.path(), b"{\"processed_seat_numbers\": [").unwrap();
        assert!(matches!(s.load(), Err(CertError::CheckpointCorrupt { .. })));
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let mut cp = Checkpoint::default();
        for seat in ["1", "2", "3"] {
            s.append_processed(&mut cp, seat).unwrap();
        }
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.save(&Checkpoint::default()).unwrap();
        assert!(s.remove().unwrap());
        assert!(!s.remove().unwrap());
        assert!(!s.exists());
    }

    #[test]
    fn bind_params_rejects_mismatch() {
        let mut cp = Checkpoint::default();
        let original = BatchParams::new("2024", "B.COM", 6);
        cp.bind_params(&original).unwrap();
        assert_eq!(cp.params.as_ref(), Some(&original));
        cp.bind_params(&original).unwrap();

        let other = BatchParams::new("2024", "B.COM", 5);
        assert!(matches!(
            cp.bind_params(&other),
            Err(CertError::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn stage_order_and_names() {
        assert!(Stage::Start < Stage::CertificateGeneration);
        assert!(!Stage::CertificateGeneration.rendering_complete());
        assert!(Stage::WordDocumentGeneration.rendering_complete());
        assert!(!Stage::WordDocumentGeneration.document_complete());
        assert_eq!(Stage::PdfGeneration.to_string(), "pdf_generation");
        assert_eq!(
            serde_json::to_string(&Stage::WordDocumentGeneration).unwrap(),
            "\"word_document_generation\""
        );
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let other = CheckpointStore::new(dir.path().join("checkpoint.json"));

        let lock = store.lock().unwrap();
        assert_eq!(lock.path(), dir.path().join("checkpoint.json.lock"));
        assert_eq!(
            std::fs::read_to_string(lock.path()).unwrap(),
            std::process::id().to_string()
        );
        assert!(matches!(other.lock(), Err(CertError::BatchInProgress)));

        drop(lock);
        assert!(!store.lock_path().exists());
        assert!(other.lock().is_ok());
    }

    #[test]
    fn lock_held_by_live_process_is_respected() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        // Our own pid is always alive.
        std::fs::write(store.lock_path(), std::process::id().to_string()).unwrap();
        assert!(matches!(store.lock(), Err(CertError::BatchInProgress)));
        assert!(store.lock_path().exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stale_lock_from_dead_process_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        std::fs::write(store.lock_path(), "4294967294").unwrap();

        let lock = store.lock().unwrap();
        assert_eq!(
            std::fs::read_to_string(lock.path()).unwrap(),
            std::process::id().to_string()
        );
    }
}
