//! Startup reconciliation between the store and the media directories.
//!
//! Four independent passes, each best effort: purge stale inbox drops,
//! purge expired scratch files, re-apply the history ceiling, and
//! delete media no history row references anymore. Safe to run
//! repeatedly; a second run right after the first finds nothing to do.

use crate::fsops::{file_size, remove_quiet};
use crate::history;
use crate::history::CleanupReport;
use crate::layout::Layout;
use crate::settings::{Tunables, DEFAULT_HISTORY_CAP};
use crate::store::Store;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// File name prefixes treated as expendable scratch output.
const SCRATCH_PREFIXES: [&str; 2] = ["tmp-", "test-"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub inbox_deleted: usize,
    pub scratch: CleanupReport,
    pub history: CleanupReport,
    pub orphans: CleanupReport,
}

/// Run every reconciliation pass. Individual failures are logged and
/// skipped; the sweep itself never fails.
pub fn run(store: &Store, layout: &Layout) -> SweepReport {
    let report = SweepReport {
        inbox_deleted: purge_inbox(layout),
        scratch: purge_scratch(layout),
        history: enforce_history_cap(store),
        orphans: remove_orphan_media(store, layout),
    };
    tracing::info!(
        inbox = report.inbox_deleted,
        scratch = report.scratch.deleted,
        history = report.history.deleted,
        orphans = report.orphans.deleted,
        freed_bytes = report.scratch.freed_bytes + report.history.freed_bytes + report.orphans.freed_bytes,
        "reconciliation sweep finished"
    );
    report
}

/// Inbox drops left over from a previous run were never fully
/// processed; delete them rather than re-ingest half-written files.
fn purge_inbox(layout: &Layout) -> usize {
    let mut deleted = 0;
    for path in files_in(&layout.inbox_dir()) {
        if remove_quiet(&path) {
            deleted += 1;
        }
    }
    if deleted > 0 {
        tracing::info!(deleted, "purged stale inbox files");
    }
    deleted
}

fn purge_scratch(layout: &Layout) -> CleanupReport {
    let mut report = CleanupReport::default();
    for path in files_in(&layout.scratch_dir()) {
        let expendable = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| SCRATCH_PREFIXES.iter().any(|p| n.starts_with(p)));
        if !expendable {
            continue;
        }
        report.freed_bytes += file_size(&path);
        if remove_quiet(&path) {
            report.deleted += 1;
        }
    }
    report
}

fn enforce_history_cap(store: &Store) -> CleanupReport {
    let cap = match Tunables::load(store) {
        Ok(tunables) => tunables.history_cap,
        Err(e) => {
            tracing::warn!(error = %e, "could not load tunables; using default history cap");
            DEFAULT_HISTORY_CAP
        }
    };
    match history::evict_overflow(store, cap) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(error = %e, "history cap enforcement failed");
            CleanupReport::default()
        }
    }
}

/// Delete history/thumbnail files no record references.
///
/// When the referenced set cannot be read, nothing is deleted: wiping
/// media on a database fault would be worse than keeping orphans one
/// more round.
fn remove_orphan_media(store: &Store, layout: &Layout) -> CleanupReport {
    let referenced = match history::referenced_media(store) {
        Ok(paths) => paths,
        Err(e) => {
            tracing::warn!(error = %e, "could not list referenced media; skipping orphan scan");
            return CleanupReport::default();
        }
    };
    // Fall back to file-name matching so records written under a
    // differently-spelled data root are still recognized.
    let referenced_names: HashSet<OsString> = referenced
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_os_string()))
        .collect();

    let mut report = CleanupReport::default();
    for dir in [layout.history_dir(), layout.thumbs_dir()] {
        for path in files_in(&dir) {
            if referenced.contains(&path) {
                continue;
            }
            if path
                .file_name()
                .is_some_and(|n| referenced_names.contains(n))
            {
                continue;
            }
            report.freed_bytes += file_size(&path);
            if remove_quiet(&path) {
                tracing::debug!(path = %path.display(), "removed orphan media file");
                report.deleted += 1;
            }
        }
    }
    report
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot read directory");
            return Vec::new();
        }
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect()
}
