//! Best-effort filesystem helpers shared by the store modules.
//!
//! Media files are subordinate to database rows: a failed file deletion
//! is logged and left for the reconciliation sweep, never propagated.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Delete a file if it exists. Returns false only on a real failure.
pub(crate) fn remove_quiet(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete file");
            false
        }
    }
}

/// Size of a file, treating missing or unreadable files as empty.
pub(crate) fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Remove a directory only when it has no entries left.
pub(crate) fn remove_dir_if_empty(path: &Path) {
    let Ok(mut entries) = fs::read_dir(path) else { return };
    if entries.next().is_none() {
        if let Err(e) = fs::remove_dir(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove empty directory");
        }
    }
}
