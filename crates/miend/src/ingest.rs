//! Inbox watching and single-worker ingestion.
//!
//! A notify watcher turns create events into jobs on an unbounded
//! channel; one dedicated OS thread drains them. Files are claimed
//! before queueing so the duplicate events most backends emit for a
//! single drop collapse into one job, and the claim is released by a
//! drop guard on every exit path, panics included.

use crate::stability;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Extensions accepted for ingestion, matched case-insensitively.
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("watch failed: {0}")]
    Watch(#[from] notify::Error),
    #[error("failed to spawn ingest worker: {0}")]
    Spawn(std::io::Error),
}

/// Paths currently queued or being processed.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<PathBuf>>>);

impl InFlight {
    /// Claim `path`. Returns `None` when it is already claimed, i.e.
    /// this event is a duplicate of one still in the pipeline.
    fn claim(&self, path: &Path) -> Option<InFlightGuard> {
        let mut set = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if set.insert(path.to_path_buf()) {
            Some(InFlightGuard {
                set: Arc::clone(&self.0),
                path: path.to_path_buf(),
            })
        } else {
            None
        }
    }
}

/// Releases the in-flight claim when dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

struct IngestJob {
    path: PathBuf,
    _claim: InFlightGuard,
}

/// Messages sent from the watcher callback to the worker thread.
enum IngestRequest {
    Process(IngestJob),
    Shutdown,
}

/// Owns the filesystem watcher and the worker thread.
pub struct IngestService {
    watcher: RecommendedWatcher,
    tx: mpsc::UnboundedSender<IngestRequest>,
    worker: JoinHandle<()>,
}

impl IngestService {
    /// Watch `inbox` (non-recursive) and run `handler` on every stable
    /// new image file, one at a time on a dedicated thread.
    pub fn spawn<F>(
        inbox: &Path,
        settle: Duration,
        retry: Duration,
        handler: F,
    ) -> Result<Self, IngestError>
    where
        F: Fn(&Path) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<IngestRequest>();
        let inflight = InFlight::default();

        let mut watcher = RecommendedWatcher::new(
            {
                let tx = tx.clone();
                let inflight = inflight.clone();
                move |result: notify::Result<Event>| match result {
                    Ok(event) => enqueue_created(&event, &inflight, &tx),
                    Err(e) => tracing::error!(error = %e, "watcher error"),
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(inbox, RecursiveMode::NonRecursive)?;
        tracing::info!(inbox = %inbox.display(), "watching ingestion directory");

        let worker = std::thread::Builder::new()
            .name("mien-ingest".into())
            .spawn(move || {
                tracing::info!("ingest worker started");
                while let Some(request) = rx.blocking_recv() {
                    let job = match request {
                        IngestRequest::Process(job) => job,
                        IngestRequest::Shutdown => break,
                    };
                    let run = catch_unwind(AssertUnwindSafe(|| {
                        wait_until_stable(&job.path, settle, retry);
                        handler(&job.path);
                    }));
                    if run.is_err() {
                        tracing::error!(
                            path = %job.path.display(),
                            "ingestion handler panicked; worker continues"
                        );
                    }
                    // `job` drops here, releasing the in-flight claim.
                }
                tracing::info!("ingest worker exiting");
            })
            .map_err(IngestError::Spawn)?;

        Ok(Self { watcher, tx, worker })
    }

    /// Stop the service. The job being processed finishes; queued jobs
    /// are discarded. Joins the worker thread.
    pub fn stop(self) {
        let IngestService { watcher, tx, worker } = self;
        // Stop event delivery before closing down the queue.
        drop(watcher);
        let _ = tx.send(IngestRequest::Shutdown);
        drop(tx);
        if worker.join().is_err() {
            tracing::error!("ingest worker terminated abnormally");
        }
    }
}

/// Filter one notify event down to fresh image files and queue them.
fn enqueue_created(
    event: &Event,
    inflight: &InFlight,
    tx: &mpsc::UnboundedSender<IngestRequest>,
) {
    if !matches!(event.kind, EventKind::Create(_)) {
        return;
    }
    for path in &event.paths {
        if path.is_dir() || !has_image_extension(path) {
            continue;
        }
        let Some(claim) = inflight.claim(path) else {
            tracing::debug!(path = %path.display(), "duplicate event for in-flight file; ignored");
            continue;
        };
        tracing::info!(path = %path.display(), "new file detected");
        let job = IngestJob { path: path.clone(), _claim: claim };
        if tx.send(IngestRequest::Process(job)).is_err() {
            tracing::warn!(path = %path.display(), "ingest worker gone; event dropped");
        }
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|allowed| e.eq_ignore_ascii_case(allowed)))
}

/// Wait for the file to settle, probing at most twice. After the
/// second probe the file is handed on regardless, so a pathological
/// writer cannot stall the worker forever.
fn wait_until_stable(path: &Path, settle: Duration, retry: Duration) {
    if stability::is_stable(path, settle) {
        return;
    }
    tracing::warn!(path = %path.display(), "file still settling; probing once more");
    if !stability::is_stable(path, retry) {
        tracing::warn!(path = %path.display(), "file never settled; processing anyway");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn test_extension_filter() {
        assert!(has_image_extension(Path::new("/in/a.jpg")));
        assert!(has_image_extension(Path::new("/in/a.JPEG")));
        assert!(has_image_extension(Path::new("/in/a.Png")));
        assert!(!has_image_extension(Path::new("/in/a.gif")));
        assert!(!has_image_extension(Path::new("/in/a.jpg.part")));
        assert!(!has_image_extension(Path::new("/in/noext")));
    }

    #[test]
    fn test_inflight_claim_blocks_duplicates() {
        let inflight = InFlight::default();
        let path = Path::new("/in/a.jpg");

        let first = inflight.claim(path);
        assert!(first.is_some());
        assert!(inflight.claim(path).is_none());

        drop(first);
        // Claim is free again after the guard drops.
        assert!(inflight.claim(path).is_some());
    }

    #[test]
    fn test_inflight_claims_are_per_path() {
        let inflight = InFlight::default();
        let _a = inflight.claim(Path::new("/in/a.jpg")).unwrap();
        assert!(inflight.claim(Path::new("/in/b.jpg")).is_some());
    }

    #[test]
    fn test_service_processes_dropped_file() {
        let dir = tempfile::tempdir().unwrap();
        let (seen_tx, seen_rx) = std_mpsc::channel::<PathBuf>();

        let service = IngestService::spawn(
            dir.path(),
            Duration::from_millis(5),
            Duration::from_millis(5),
            move |path| {
                let _ = seen_tx.send(path.to_path_buf());
            },
        )
        .unwrap();

        fs::write(dir.path().join("face.jpg"), b"image bytes").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let seen = seen_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("watcher never delivered the file");
        assert_eq!(seen.file_name().unwrap(), "face.jpg");

        // The text file must not come through.
        assert!(seen_rx.recv_timeout(Duration::from_millis(200)).is_err());
        service.stop();
    }

    #[test]
    fn test_worker_survives_handler_panic() {
        let dir = tempfile::tempdir().unwrap();
        let (seen_tx, seen_rx) = std_mpsc::channel::<PathBuf>();

        let service = IngestService::spawn(
            dir.path(),
            Duration::from_millis(5),
            Duration::from_millis(5),
            move |path: &Path| {
                if path.file_name().unwrap() == "bad.jpg" {
                    panic!("boom");
                }
                let _ = seen_tx.send(path.to_path_buf());
            },
        )
        .unwrap();

        fs::write(dir.path().join("bad.jpg"), b"image bytes").unwrap();
        // Give the first job time to land before the second event fires.
        std::thread::sleep(Duration::from_millis(100));
        fs::write(dir.path().join("good.jpg"), b"image bytes").unwrap();

        let seen = seen_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker died after panic");
        assert_eq!(seen.file_name().unwrap(), "good.jpg");
        service.stop();
    }
}
