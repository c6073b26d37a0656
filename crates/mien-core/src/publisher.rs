//! Outward notification of recognition events.

use serde::Serialize;

/// One recognition observation, ready for delivery to downstream
/// consumers.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionEvent {
    pub name: String,
    pub nickname: Option<String>,
    /// Match score in [0, 1]; 0.0 for unknown faces.
    pub score: f32,
    /// Estimated age in years.
    pub age: i32,
    pub gender: String,
    /// RFC 3339 timestamp of the observation.
    pub timestamp: String,
}

impl DetectionEvent {
    /// Display name for consumers: nickname when set, otherwise the
    /// identity name.
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.name)
    }
}

/// Fire-and-forget delivery of detection events.
///
/// Returns whether the event went out. Failures must not propagate;
/// recognition succeeds regardless of delivery.
pub trait Publisher: Send + Sync {
    fn publish_detection(&self, event: &DetectionEvent) -> bool;
}

/// Publisher that only writes events to the log. Used when no delivery
/// transport is configured.
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish_detection(&self, event: &DetectionEvent) -> bool {
        tracing::info!(
            name = %event.name,
            display = %event.display_name(),
            score_pct = (event.score * 100.0).round() as i32,
            age = event.age,
            gender = %event.gender,
            timestamp = %event.timestamp,
            "detection event"
        );
        true
    }
}
