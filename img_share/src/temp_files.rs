//! Per-invocation temporary file set.
//!
//! Every file one share run creates is registered here. When the set is
//! dropped (success, error, cancellation or panic unwind) every member is
//! deleted except the one marked with [`TempFileSet::keep`]. Nothing else
//! in the cache directory is touched, so concurrent runs never delete each
//! other's files.

use shared_utils::{ensure_dir_exists, Result, ShareError};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PREFIX: &str = "share_";

#[derive(Debug)]
pub struct TempFileSet {
    dir: PathBuf,
    members: Vec<PathBuf>,
    kept: Option<PathBuf>,
}

impl TempFileSet {
    pub fn new(dir: &Path) -> Result<Self> {
        ensure_dir_exists(dir).map_err(|e| ShareError::Io(io::Error::other(format!("{:#}", e))))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            members: Vec::new(),
            kept: None,
        })
    }

    /// Create a uniquely named empty file `share_<label>_XXXXXX.<ext>` and
    /// register it.
    pub fn create(&mut self, label: &str, ext: &str) -> Result<PathBuf> {
        let (_file, path) = tempfile::Builder::new()
            .prefix(&format!("{}{}_", PREFIX, label))
            .suffix(&format!(".{}", ext))
            .tempfile_in(&self.dir)?
            .keep()
            .map_err(|e| e.error)?;
        debug!(path = ?path, "Registered temp file");
        self.members.push(path.clone());
        Ok(path)
    }

    /// Exempt `path` from cleanup. Returns false when `path` was not
    /// created by this set.
    pub fn keep(&mut self, path: &Path) -> bool {
        if self.members.iter().any(|m| m == path) {
            self.kept = Some(path.to_path_buf());
            true
        } else {
            false
        }
    }

    pub fn members(&self) -> &[PathBuf] {
        &self.members
    }

    /// Delete every member except the kept one. Failures are collected,
    /// not raised; a file that is already gone counts as deleted.
    fn release(&mut self) -> Vec<ShareError> {
        let kept = self.kept.take();
        let mut failures = Vec::new();
        for path in self.members.drain(..) {
            if kept.as_deref() == Some(path.as_path()) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = ?path, "Removed temp file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => failures.push(ShareError::Cleanup(format!("{}: {}", path.display(), e))),
            }
        }
        failures
    }
}

impl Drop for TempFileSet {
    fn drop(&mut self) {
        for failure in self.release() {
            warn!(error = %failure, "Temp file cleanup failed");
        }
    }
}
