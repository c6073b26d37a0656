//! The per-file recognition pipeline.
//!
//! One stable inbox file goes through: size gate, decode, analyzer,
//! gallery match, optional auto-enrollment, history append, publish.
//! The source file is deleted on every exit path; a fault anywhere is
//! logged and the worker moves on to the next file.

use chrono::Local;
use image::imageops::FilterType;
use image::DynamicImage;
use mien_core::{find_match, FaceAnalyzer, Publisher};
use mien_core::{BoundingBox, DetectionEvent, Gender};
use mien_store::history::NewRecord;
use mien_store::{history, quota, Layout, Store, Tunables};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Ingested files larger than this are rejected before decoding.
const MAX_IMAGE_BYTES: u64 = 8 * 1024 * 1024;
/// Square edge of history thumbnails.
const THUMB_SIZE: u32 = 150;
/// Name recorded for faces no identity matched.
const UNKNOWN_NAME: &str = "Unknown";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] mien_store::StoreError),

    #[error("failed to write history frame: {0}")]
    FrameWrite(image::ImageError),

    #[error("failed to write history thumbnail: {0}")]
    ThumbWrite(image::ImageError),
}

/// Why a file was abandoned without a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    Oversized,
    Unreadable,
    NoFace,
    AnalyzerFailed,
}

/// What one ingested file produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rejected(Reject),
    Recognized {
        name: String,
        score: f32,
        /// Sample id auto-enrolled from this observation, if any.
        enrolled: Option<i64>,
        history_id: i64,
    },
    Unknown {
        history_id: i64,
    },
}

pub struct Pipeline {
    store: Arc<Store>,
    layout: Layout,
    analyzer: Arc<dyn FaceAnalyzer>,
    publisher: Arc<dyn Publisher>,
}

// Everything record_and_publish needs besides the frame itself.
struct Observation<'a> {
    identity_id: Option<i64>,
    name: &'a str,
    nickname: Option<&'a str>,
    score: f32,
    sample_id: Option<i64>,
    bbox: BoundingBox,
    age: i32,
    gender: Gender,
}

impl Pipeline {
    pub fn new(
        store: Arc<Store>,
        layout: Layout,
        analyzer: Arc<dyn FaceAnalyzer>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self { store, layout, analyzer, publisher }
    }

    /// Process one inbox file end to end, deleting it afterwards no
    /// matter how processing went.
    pub fn process(&self, path: &Path) -> Result<Outcome, PipelineError> {
        tracing::info!(path = %path.display(), "processing image");
        let result = self.ingest(path);
        match &result {
            Ok(Outcome::Recognized { name, score, enrolled, history_id }) => {
                tracing::info!(path = %path.display(), name = %name, score, enrolled = ?enrolled, history_id, "face recognized");
            }
            Ok(Outcome::Unknown { history_id }) => {
                tracing::info!(path = %path.display(), history_id, "unknown face recorded");
            }
            Ok(Outcome::Rejected(reason)) => {
                tracing::debug!(path = %path.display(), ?reason, "image abandoned");
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "pipeline failed");
            }
        }
        remove_source(path);
        result
    }

    fn ingest(&self, path: &Path) -> Result<Outcome, PipelineError> {
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size > MAX_IMAGE_BYTES {
            tracing::warn!(path = %path.display(), size, "image exceeds size cap");
            return Ok(Outcome::Rejected(Reject::Oversized));
        }

        let img = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable image");
                return Ok(Outcome::Rejected(Reject::Unreadable));
            }
        };

        let face = match self.analyzer.detect(path) {
            Ok(Some(face)) => face,
            Ok(None) => {
                tracing::info!(path = %path.display(), "no face in image");
                return Ok(Outcome::Rejected(Reject::NoFace));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "analyzer failed");
                return Ok(Outcome::Rejected(Reject::AnalyzerFailed));
            }
        };

        let tunables = Tunables::load(&self.store)?;
        let gallery = self.store.gallery()?;
        let hit = find_match(&face.embedding, &gallery, tunables.threshold, tunables.top_k);
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%6f").to_string();

        match hit {
            Some(hit) => {
                tracing::info!(
                    name = %hit.name,
                    score = hit.score,
                    age = face.age,
                    gender = face.gender.label(),
                    "face matched"
                );
                let identity = self.store.identity_by_name(&hit.name)?;
                let enrolled = match &identity {
                    Some(identity) if tunables.auto_train => {
                        match quota::enroll(
                            &self.store,
                            &self.layout,
                            identity,
                            &face.crop,
                            &face.embedding,
                            path,
                            &stamp,
                        ) {
                            Ok(sample_id) => Some(sample_id),
                            Err(e) => {
                                // Enrollment is opportunistic; the observation
                                // is still recorded.
                                tracing::warn!(identity = %hit.name, error = %e, "auto-enroll failed");
                                None
                            }
                        }
                    }
                    Some(_) => {
                        tracing::debug!(identity = %hit.name, "auto-train disabled");
                        None
                    }
                    None => {
                        tracing::warn!(identity = %hit.name, "matched identity vanished before enrollment");
                        None
                    }
                };

                let history_id = self.record_and_publish(
                    &img,
                    &stamp,
                    Observation {
                        identity_id: identity.as_ref().map(|p| p.id),
                        name: &hit.name,
                        nickname: hit.nickname.as_deref(),
                        score: hit.score,
                        sample_id: enrolled,
                        bbox: face.bbox,
                        age: face.age,
                        gender: face.gender,
                    },
                    tunables.history_cap,
                )?;
                Ok(Outcome::Recognized {
                    name: hit.name,
                    score: hit.score,
                    enrolled,
                    history_id,
                })
            }
            None => {
                tracing::info!(age = face.age, gender = face.gender.label(), "face not recognized");
                let history_id = self.record_and_publish(
                    &img,
                    &stamp,
                    Observation {
                        identity_id: None,
                        name: UNKNOWN_NAME,
                        nickname: None,
                        score: 0.0,
                        sample_id: None,
                        bbox: face.bbox,
                        age: face.age,
                        gender: face.gender,
                    },
                    tunables.history_cap,
                )?;
                Ok(Outcome::Unknown { history_id })
            }
        }
    }

    /// Write the frame and its thumbnail, append the ledger record, then
    /// publish. The thumbnail write failing rolls back the frame and
    /// aborts the append so the ledger never points at half a pair.
    fn record_and_publish(
        &self,
        img: &DynamicImage,
        stamp: &str,
        obs: Observation<'_>,
        history_cap: usize,
    ) -> Result<i64, PipelineError> {
        let frame_path = self.layout.history_dir().join(format!("{stamp}.jpg"));
        let thumb_path = self.layout.thumbs_dir().join(format!("{stamp}.jpg"));

        // JPEG output; RGBA sources must be flattened first.
        let frame = DynamicImage::ImageRgb8(img.to_rgb8());
        frame.save(&frame_path).map_err(PipelineError::FrameWrite)?;

        let thumb = frame.resize_exact(THUMB_SIZE, THUMB_SIZE, FilterType::Triangle);
        if let Err(e) = thumb.save(&thumb_path) {
            remove_file_quiet(&frame_path);
            return Err(PipelineError::ThumbWrite(e));
        }

        let record = NewRecord {
            identity_id: obs.identity_id,
            name: obs.name.to_string(),
            nickname: obs.nickname.map(str::to_string),
            score: obs.score,
            image_path: frame_path.to_string_lossy().into_owned(),
            thumb_path: thumb_path.to_string_lossy().into_owned(),
            bbox: Some(obs.bbox),
            sample_id: obs.sample_id,
        };
        let history_id = history::append(&self.store, &record, history_cap)?;

        let event = DetectionEvent {
            name: obs.name.to_string(),
            nickname: obs.nickname.map(str::to_string),
            score: obs.score,
            age: obs.age,
            gender: obs.gender.label().to_string(),
            timestamp: Local::now().to_rfc3339(),
        };
        if !self.publisher.publish_detection(&event) {
            tracing::warn!(name = %event.name, "detection event not delivered");
        }

        Ok(history_id)
    }
}

fn remove_source(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "source file deleted"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to delete source file"),
    }
}

fn remove_file_quiet(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete file");
        }
    }
}
