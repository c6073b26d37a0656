//! Typed view over the settings table.
//!
//! Behaviour is tuned through a flat key/value table so values can be
//! changed at runtime without a restart. Consumers resolve a
//! [`Tunables`] snapshot once per pass; a missing or unparsable value
//! falls back to its compiled default.

use crate::store::{Store, StoreError};
use std::str::FromStr;

pub const RECOGNITION_THRESHOLD: &str = "recognition_threshold";
pub const VOTING_TOP_K: &str = "voting_top_k";
pub const MAX_SAMPLES_PER_IDENTITY: &str = "max_samples_per_identity";
pub const HISTORY_MAX_RECORDS: &str = "history_max_records";
pub const AUTO_TRAIN_ENABLED: &str = "auto_train_enabled";

pub const DEFAULT_THRESHOLD: f32 = 0.4;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_MAX_SAMPLES: usize = 10;
pub const DEFAULT_HISTORY_CAP: usize = 30;
pub const DEFAULT_AUTO_TRAIN: bool = true;

/// Snapshot of the recognition tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tunables {
    /// Minimum similarity a match must strictly exceed.
    pub threshold: f32,
    /// Samples averaged per identity; clamped to at least 1.
    pub top_k: usize,
    /// Per-identity training sample quota; clamped to at least 1.
    pub max_samples: usize,
    /// Ceiling on history ledger rows.
    pub history_cap: usize,
    /// Whether matches enroll a fresh sample automatically.
    pub auto_train: bool,
}

impl Tunables {
    pub fn load(store: &Store) -> Result<Self, StoreError> {
        Ok(Self {
            threshold: parse_or(store.setting(RECOGNITION_THRESHOLD)?, DEFAULT_THRESHOLD),
            top_k: parse_or(store.setting(VOTING_TOP_K)?, DEFAULT_TOP_K).max(1),
            max_samples: parse_or(store.setting(MAX_SAMPLES_PER_IDENTITY)?, DEFAULT_MAX_SAMPLES)
                .max(1),
            history_cap: parse_or(store.setting(HISTORY_MAX_RECORDS)?, DEFAULT_HISTORY_CAP),
            auto_train: store
                .setting(AUTO_TRAIN_ENABLED)?
                .map(|v| v == "true")
                .unwrap_or(DEFAULT_AUTO_TRAIN),
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_values_are_used() {
        let store = Store::open_in_memory().unwrap();
        let tunables = Tunables::load(&store).unwrap();
        assert!((tunables.threshold - 0.30).abs() < 1e-6);
        assert_eq!(tunables.top_k, 3);
        assert_eq!(tunables.max_samples, 10);
        assert_eq!(tunables.history_cap, 30);
        assert!(tunables.auto_train);
    }

    #[test]
    fn test_garbage_values_fall_back_to_defaults() {
        let store = Store::open_in_memory().unwrap();
        store.set_setting(RECOGNITION_THRESHOLD, "not a number").unwrap();
        store.set_setting(VOTING_TOP_K, "").unwrap();
        store.set_setting(MAX_SAMPLES_PER_IDENTITY, "-3").unwrap();
        let tunables = Tunables::load(&store).unwrap();
        assert!((tunables.threshold - DEFAULT_THRESHOLD).abs() < 1e-6);
        assert_eq!(tunables.top_k, DEFAULT_TOP_K);
        assert_eq!(tunables.max_samples, DEFAULT_MAX_SAMPLES);
    }

    #[test]
    fn test_top_k_clamped_to_one() {
        let store = Store::open_in_memory().unwrap();
        store.set_setting(VOTING_TOP_K, "0").unwrap();
        assert_eq!(Tunables::load(&store).unwrap().top_k, 1);
    }

    #[test]
    fn test_auto_train_only_literal_true() {
        let store = Store::open_in_memory().unwrap();
        store.set_setting(AUTO_TRAIN_ENABLED, "false").unwrap();
        assert!(!Tunables::load(&store).unwrap().auto_train);
        store.set_setting(AUTO_TRAIN_ENABLED, "yes").unwrap();
        assert!(!Tunables::load(&store).unwrap().auto_train);
        store.set_setting(AUTO_TRAIN_ENABLED, "true").unwrap();
        assert!(Tunables::load(&store).unwrap().auto_train);
    }

    #[test]
    fn test_runtime_change_visible_on_next_load() {
        let store = Store::open_in_memory().unwrap();
        store.set_setting(RECOGNITION_THRESHOLD, "0.72").unwrap();
        let tunables = Tunables::load(&store).unwrap();
        assert!((tunables.threshold - 0.72).abs() < 1e-6);
    }
}
