//! On-disk media layout.
//!
//! Everything lives under one data directory:
//!
//! ```text
//! <data>/
//!   inbox/       watched ingestion directory (overridable)
//!   scratch/     analyzer hand-off files, purged by prefix
//!   crops/<identity>/      training sample face crops
//!   originals/<identity>/  full source frames for samples
//!   history/     full frames referenced by the history ledger
//!   thumbs/      history thumbnails
//! ```

use crate::fsops::remove_dir_if_empty;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    inbox: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let inbox = root.join("inbox");
        Self { root, inbox }
    }

    /// Watch a different inbox than `<root>/inbox`.
    pub fn with_inbox(mut self, inbox: impl Into<PathBuf>) -> Self {
        self.inbox = inbox.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.inbox.clone()
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join("history")
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.root.join("thumbs")
    }

    pub fn crops_root(&self) -> PathBuf {
        self.root.join("crops")
    }

    pub fn originals_root(&self) -> PathBuf {
        self.root.join("originals")
    }

    pub fn crops_dir(&self, identity: &str) -> PathBuf {
        self.crops_root().join(identity)
    }

    pub fn originals_dir(&self, identity: &str) -> PathBuf {
        self.originals_root().join(identity)
    }

    /// Create the fixed directories. Per-identity directories are
    /// created lazily at first enrollment.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            self.inbox_dir(),
            self.scratch_dir(),
            self.history_dir(),
            self.thumbs_dir(),
            self.crops_root(),
            self.originals_root(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Drop an identity's media directories if deletions emptied them.
    pub fn prune_identity_dirs(&self, identity: &str) {
        remove_dir_if_empty(&self.crops_dir(identity));
        remove_dir_if_empty(&self.originals_dir(identity));
    }

    /// Remove an identity's media directories and everything in them.
    pub fn remove_identity_dirs(&self, identity: &str) {
        for dir in [self.crops_dir(identity), self.originals_dir(identity)] {
            if dir.exists() {
                if let Err(e) = fs::remove_dir_all(&dir) {
                    tracing::warn!(path = %dir.display(), error = %e, "failed to remove identity directory");
                }
            }
        }
    }
}
