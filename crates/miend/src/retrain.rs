//! Batch re-embedding of stored training samples.
//!
//! After an analyzer model upgrade the stored embeddings no longer line
//! up with fresh probes. This job walks every sample, re-runs the
//! analyzer on its stored media (the original frame when it still
//! exists, the crop otherwise) and rewrites the embedding in place.

use mien_core::FaceAnalyzer;
use mien_store::{Store, StoreError};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrainError {
    #[error("a re-embed run is already active")]
    AlreadyRunning,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Progress snapshot of the re-embed job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrainStatus {
    pub active: bool,
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrainOutcome {
    pub retrained: usize,
    pub skipped: usize,
}

/// Owns the job state; at most one run at a time.
pub struct Retrainer {
    store: Arc<Store>,
    analyzer: Arc<dyn FaceAnalyzer>,
    status: Mutex<RetrainStatus>,
}

impl Retrainer {
    pub fn new(store: Arc<Store>, analyzer: Arc<dyn FaceAnalyzer>) -> Self {
        Self { store, analyzer, status: Mutex::new(RetrainStatus::default()) }
    }

    pub fn status(&self) -> RetrainStatus {
        self.lock().clone()
    }

    /// Re-embed every stored sample.
    ///
    /// Samples whose media is gone or where the analyzer finds no face
    /// are skipped and counted; only storage faults abort the run.
    /// Returns [`RetrainError::AlreadyRunning`] when a run is active.
    pub fn run(&self) -> Result<RetrainOutcome, RetrainError> {
        {
            let mut status = self.lock();
            if status.active {
                return Err(RetrainError::AlreadyRunning);
            }
            *status = RetrainStatus { active: true, ..RetrainStatus::default() };
        }

        let result = self.run_inner();
        self.lock().active = false;
        result
    }

    fn run_inner(&self) -> Result<RetrainOutcome, RetrainError> {
        let identities = self.store.list_identities()?;
        let mut batches = Vec::new();
        let mut total = 0;
        for identity in identities {
            let samples = self.store.samples_for(identity.id)?;
            total += samples.len();
            batches.push((identity, samples));
        }
        self.lock().total = total;
        tracing::info!(samples = total, "re-embedding stored samples");

        let mut outcome = RetrainOutcome::default();
        for (identity, samples) in batches {
            tracing::debug!(identity = %identity.name, samples = samples.len(), "re-embedding identity");
            for sample in samples {
                self.lock().done += 1;

                let source = sample
                    .original_path
                    .as_ref()
                    .map(PathBuf::from)
                    .filter(|p| p.exists())
                    .unwrap_or_else(|| PathBuf::from(&sample.crop_path));
                if !source.exists() {
                    tracing::warn!(sample_id = sample.id, "sample media missing; skipped");
                    outcome.skipped += 1;
                    continue;
                }

                match self.analyzer.detect(&source) {
                    Ok(Some(face)) => {
                        self.store.update_sample_embedding(sample.id, &face.embedding)?;
                        outcome.retrained += 1;
                    }
                    Ok(None) => {
                        tracing::warn!(
                            sample_id = sample.id,
                            path = %source.display(),
                            "no face found during re-embed; skipped"
                        );
                        outcome.skipped += 1;
                    }
                    Err(e) => {
                        tracing::warn!(sample_id = sample.id, error = %e, "re-embed failed; skipped");
                        outcome.skipped += 1;
                    }
                }
            }
        }

        tracing::info!(
            retrained = outcome.retrained,
            skipped = outcome.skipped,
            "re-embedding finished"
        );
        Ok(outcome)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RetrainStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mien_core::{AnalyzerError, BoundingBox, DetectedFace, Embedding, Gender};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;

    struct FixedAnalyzer {
        embedding: Vec<f32>,
    }

    impl FaceAnalyzer for FixedAnalyzer {
        fn detect(&self, _image: &Path) -> Result<Option<DetectedFace>, AnalyzerError> {
            Ok(Some(DetectedFace {
                crop: image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
                    4,
                    4,
                    image::Rgb([0, 0, 0]),
                )),
                embedding: Embedding::new(self.embedding.clone()),
                age: 0,
                gender: Gender::Unknown,
                bbox: BoundingBox { x: 0, y: 0, width: 4, height: 4, img_width: 4, img_height: 4 },
            }))
        }
    }

    /// Blocks inside the first detect() until the test lets it through,
    /// so the test can observe an active run. Later calls pass straight
    /// through.
    struct GatedAnalyzer {
        enter: Arc<Barrier>,
        exit: Arc<Barrier>,
        armed: AtomicBool,
    }

    impl FaceAnalyzer for GatedAnalyzer {
        fn detect(&self, _image: &Path) -> Result<Option<DetectedFace>, AnalyzerError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.enter.wait();
                self.exit.wait();
            }
            Ok(None)
        }
    }

    fn seed_sample(store: &Store, dir: &Path, name: &str) -> i64 {
        let identity = store.create_identity(name, None).unwrap();
        let crop = dir.join(format!("{name}.jpg"));
        fs::write(&crop, b"media").unwrap();
        store
            .add_sample(identity.id, crop.to_str().unwrap(), None, &Embedding::new(vec![0.0]))
            .unwrap()
    }

    #[test]
    fn test_run_rewrites_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let sample_id = seed_sample(&store, dir.path(), "Ana");

        let retrainer = Retrainer::new(
            Arc::clone(&store),
            Arc::new(FixedAnalyzer { embedding: vec![0.6, 0.8] }),
        );
        let outcome = retrainer.run().unwrap();

        assert_eq!(outcome, RetrainOutcome { retrained: 1, skipped: 0 });
        let ana = store.identity_by_name("ana").unwrap().unwrap();
        let samples = store.samples_for(ana.id).unwrap();
        assert_eq!(samples[0].id, sample_id);
        assert_eq!(samples[0].embedding, Embedding::new(vec![0.6, 0.8]));

        let status = retrainer.status();
        assert!(!status.active);
        assert_eq!(status.done, 1);
        assert_eq!(status.total, 1);
    }

    #[test]
    fn test_missing_media_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let identity = store.create_identity("Ana", None).unwrap();
        store
            .add_sample(
                identity.id,
                dir.path().join("gone.jpg").to_str().unwrap(),
                None,
                &Embedding::new(vec![0.0]),
            )
            .unwrap();

        let retrainer = Retrainer::new(
            Arc::clone(&store),
            Arc::new(FixedAnalyzer { embedding: vec![1.0] }),
        );
        let outcome = retrainer.run().unwrap();
        assert_eq!(outcome, RetrainOutcome { retrained: 0, skipped: 1 });
        // The stale embedding is left untouched.
        let samples = store.samples_for(identity.id).unwrap();
        assert_eq!(samples[0].embedding, Embedding::new(vec![0.0]));
    }

    #[test]
    fn test_second_start_while_active_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_sample(&store, dir.path(), "Ana");

        let enter = Arc::new(Barrier::new(2));
        let exit = Arc::new(Barrier::new(2));
        let retrainer = Arc::new(Retrainer::new(
            Arc::clone(&store),
            Arc::new(GatedAnalyzer {
                enter: Arc::clone(&enter),
                exit: Arc::clone(&exit),
                armed: AtomicBool::new(true),
            }),
        ));

        let runner = {
            let retrainer = Arc::clone(&retrainer);
            std::thread::spawn(move || retrainer.run())
        };

        // First run is now inside the analyzer.
        enter.wait();
        assert!(retrainer.status().active);
        assert!(matches!(retrainer.run(), Err(RetrainError::AlreadyRunning)));
        exit.wait();

        let outcome = runner.join().unwrap().unwrap();
        assert_eq!(outcome, RetrainOutcome { retrained: 0, skipped: 1 });
        assert!(!retrainer.status().active);
        // The guard is released; a fresh run may start.
        assert!(retrainer.run().is_ok());
    }
}
