//! Stable-file detection for inbox drops.
//!
//! Files appear in the inbox while still being written (scp, smb and
//! slow camera uploads all trigger the create event early). A file is
//! considered stable when it exists with the same non-zero size on two
//! probes separated by a settle pause.

use std::path::Path;
use std::thread;
use std::time::Duration;

/// Probe `path` twice, `settle` apart. True iff the file existed both
/// times with an unchanged, non-zero size.
pub fn is_stable(path: &Path, settle: Duration) -> bool {
    let Some(first) = file_size(path) else {
        return false;
    };
    thread::sleep(settle);
    let Some(second) = file_size(path) else {
        return false;
    };
    first == second && second > 0
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}
