//! mien-core — Domain types and matching for the face ingestion service.
//!
//! Holds the embedding and detection types, the hybrid top-K gallery
//! matcher, and the contracts for the two external collaborators
//! (embedding provider and event publisher).

pub mod matcher;
pub mod provider;
pub mod publisher;
pub mod slug;
pub mod types;

pub use matcher::{find_match, MatchHit};
pub use provider::{AnalyzerError, FaceAnalyzer};
pub use publisher::{DetectionEvent, LogPublisher, Publisher};
pub use types::{BoundingBox, DetectedFace, Embedding, GalleryEntry, Gender};
