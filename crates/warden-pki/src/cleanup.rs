//! Best-effort removal of identity files.

use std::io;
use std::path::{Path, PathBuf};

/// Outcome of removing a set of files. Failures never abort the sweep.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, io::Error)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Remove every file in `files`, logging and collecting each failure.
pub fn remove_files<'a>(
    identity_id: &str,
    files: impl IntoIterator<Item = (&'static str, &'a Path)>,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    for (label, path) in files {
        match std::fs::remove_file(path) {
            Ok(()) => report.removed.push(path.to_path_buf()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(identity_id, file = label, path = %path.display(), "Nothing to remove");
                report.missing.push(path.to_path_buf());
            }
            Err(e) => {
                tracing::debug!(
                    identity_id,
                    file = label,
                    path = %path.display(),
                    error = %e,
                    "Failed to remove identity file"
                );
                report.failed.push((path.to_path_buf(), e));
            }
        }
    }
    report
}
