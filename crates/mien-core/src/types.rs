use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Face embedding vector, unit-normalized by the producing model.
///
/// Serializes as a bare JSON array so it can be stored in a TEXT column
/// and exchanged with the external analyzer unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Dot product with another embedding.
    ///
    /// Both vectors are unit-normalized, so this equals cosine similarity
    /// and lands in [-1, 1].
    pub fn dot(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

/// Face region within the source frame, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Dimensions of the frame the box was measured in.
    pub img_width: u32,
    pub img_height: u32,
}

/// Estimated gender of a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Female,
    Male,
    Unknown,
}

impl Gender {
    /// Decode the analyzer's wire value (1 = male, 0 = female).
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Gender::Female,
            1 => Gender::Male,
            _ => Gender::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
            Gender::Unknown => "unknown",
        }
    }
}

/// One face found in an ingested image, as returned by the analyzer.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// Aligned face crop, ready to be stored as a training sample.
    pub crop: DynamicImage,
    pub embedding: Embedding,
    /// Estimated age in years.
    pub age: i32,
    pub gender: Gender,
    pub bbox: BoundingBox,
}

/// One stored training sample flattened for matching.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub sample_id: i64,
    pub name: String,
    pub nickname: Option<String>,
    pub embedding: Embedding,
}
