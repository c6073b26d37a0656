//! Subprocess adapter for the external face analyzer.
//!
//! Detection and embedding extraction run outside the daemon. The
//! configured command is invoked once per image with the image path as
//! its last argument and must print one JSON verdict on stdout:
//!
//! ```text
//! {"face": null}
//! {"face": {"embedding": [...], "age": 31, "gender": 1,
//!           "bbox": {"x": 10, "y": 4, "width": 80, "height": 80,
//!                    "img_width": 640, "img_height": 480},
//!           "crop_path": "/data/scratch/tmp-8f2a.jpg"}}
//! ```
//!
//! `gender` uses 1 = male, 0 = female, -1 = unknown. The crop is handed
//! over as a scratch file which the adapter consumes and removes.

use mien_core::{AnalyzerError, BoundingBox, DetectedFace, Embedding, FaceAnalyzer, Gender};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Deserialize)]
struct Verdict {
    face: Option<FaceJson>,
}

#[derive(Debug, Deserialize)]
struct FaceJson {
    embedding: Vec<f32>,
    #[serde(default)]
    age: i32,
    #[serde(default = "unknown_gender_code")]
    gender: i32,
    bbox: BoundingBox,
    crop_path: PathBuf,
}

fn unknown_gender_code() -> i32 {
    -1
}

/// Runs `<program> <args..> <image>` and parses the JSON verdict.
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
}

impl CommandAnalyzer {
    /// Split a configured command line into program and arguments.
    /// Returns `None` for an empty command.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self { program, args: parts.collect() })
    }
}

impl FaceAnalyzer for CommandAnalyzer {
    fn detect(&self, image: &Path) -> Result<Option<DetectedFace>, AnalyzerError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .output()?;

        if !output.status.success() {
            return Err(AnalyzerError::Failed(format!(
                "analyzer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let verdict: Verdict = serde_json::from_slice(&output.stdout)
            .map_err(|e| AnalyzerError::Malformed(e.to_string()))?;
        let Some(face) = verdict.face else {
            return Ok(None);
        };
        if face.embedding.is_empty() {
            return Err(AnalyzerError::Malformed("empty embedding".to_string()));
        }

        let crop = image::open(&face.crop_path).map_err(|e| {
            AnalyzerError::Malformed(format!("crop {}: {e}", face.crop_path.display()))
        })?;
        // Scratch hand-off file is consumed; leftovers fall to the sweep.
        if let Err(e) = std::fs::remove_file(&face.crop_path) {
            tracing::debug!(path = %face.crop_path.display(), error = %e, "scratch crop not removed");
        }

        Ok(Some(DetectedFace {
            crop,
            embedding: Embedding::new(face.embedding),
            age: face.age,
            gender: Gender::from_code(face.gender),
            bbox: face.bbox,
        }))
    }
}
