//! Contract for the external face analyzer.

use crate::types::DetectedFace;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("analyzer output malformed: {0}")]
    Malformed(String),

    #[error("analyzer failed: {0}")]
    Failed(String),
}

/// Face detection and embedding extraction.
///
/// Detection and embedding are produced outside this service; the
/// pipeline only consumes the verdict. `Ok(None)` means the image was
/// readable but contained no usable face.
pub trait FaceAnalyzer: Send + Sync {
    fn detect(&self, image: &Path) -> Result<Option<DetectedFace>, AnalyzerError>;
}
