//! Hybrid top-K gallery matching.
//!
//! Scores every sample against the probe, then aggregates per identity:
//! identities with at least K samples are scored by the mean of their K
//! best samples, sparser identities by their single best sample. The
//! winner must strictly exceed the threshold.

use crate::types::{Embedding, GalleryEntry};
use std::collections::HashMap;

/// Best identity for a probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchHit {
    /// Representative sample: the highest-scoring one among those that
    /// produced the final score.
    pub sample_id: i64,
    pub name: String,
    pub nickname: Option<String>,
    /// Aggregated similarity in [-1, 1].
    pub score: f32,
}

/// Match `probe` against the gallery.
///
/// Returns `None` when the gallery is empty or no identity scores
/// strictly above `threshold`. Gallery entries whose dimension differs
/// from the probe are skipped. Ties between identities break toward the
/// lexicographically smaller name, independent of gallery order.
pub fn find_match(
    probe: &Embedding,
    gallery: &[GalleryEntry],
    threshold: f32,
    top_k: usize,
) -> Option<MatchHit> {
    let top_k = top_k.max(1);

    struct Scores<'a> {
        nickname: &'a Option<String>,
        // (similarity, sample_id) per sample of this identity
        samples: Vec<(f32, i64)>,
    }

    let mut per_identity: HashMap<&str, Scores<'_>> = HashMap::new();
    for entry in gallery {
        if entry.embedding.dim() != probe.dim() {
            tracing::warn!(
                sample_id = entry.sample_id,
                expected = probe.dim(),
                got = entry.embedding.dim(),
                "skipping gallery entry with mismatched embedding dimension"
            );
            continue;
        }
        let score = probe.dot(&entry.embedding);
        per_identity
            .entry(entry.name.as_str())
            .or_insert_with(|| Scores { nickname: &entry.nickname, samples: Vec::new() })
            .samples
            .push((score, entry.sample_id));
    }

    let mut best: Option<MatchHit> = None;
    for (name, scores) in per_identity.iter_mut() {
        scores.samples.sort_by(|a, b| b.0.total_cmp(&a.0));
        let (score, sample_id) = if scores.samples.len() >= top_k {
            let top = &scores.samples[..top_k];
            let mean = top.iter().map(|(s, _)| s).sum::<f32>() / top_k as f32;
            (mean, top[0].1)
        } else {
            scores.samples[0]
        };

        let wins = match &best {
            None => score > threshold,
            Some(current) => {
                score > current.score
                    || (score == current.score && *name < current.name.as_str())
            }
        };
        if wins {
            best = Some(MatchHit {
                sample_id,
                name: (*name).to_string(),
                nickname: scores.nickname.clone(),
                score,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sample_id: i64, name: &str, values: &[f32]) -> GalleryEntry {
        GalleryEntry {
            sample_id,
            name: name.to_string(),
            nickname: None,
            embedding: Embedding::new(values.to_vec()),
        }
    }

    #[test]
    fn test_empty_gallery_matches_nothing() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(find_match(&probe, &[], 0.4, 3), None);
    }

    #[test]
    fn test_score_at_threshold_is_rejected() {
        // Exactly the threshold must not match; only strictly above does.
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![entry(1, "ana", &[0.5, 0.0, 0.0])];
        assert_eq!(find_match(&probe, &gallery, 0.5, 3), None);

        let hit = find_match(&probe, &gallery, 0.49, 3).unwrap();
        assert_eq!(hit.name, "ana");
        assert_eq!(hit.sample_id, 1);
    }

    #[test]
    fn test_sparse_identity_uses_best_single_sample() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            entry(1, "ana", &[0.5, 0.0, 0.0]),
            entry(2, "ana", &[0.8, 0.0, 0.0]),
        ];
        // Two samples with K = 3: the best single score wins, no averaging.
        let hit = find_match(&probe, &gallery, 0.4, 3).unwrap();
        assert!((hit.score - 0.8).abs() < 1e-6);
        assert_eq!(hit.sample_id, 2);
    }

    #[test]
    fn test_populous_identity_uses_top_k_mean() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            entry(1, "ana", &[0.9, 0.0, 0.0]),
            entry(2, "ana", &[0.8, 0.0, 0.0]),
            entry(3, "ana", &[0.7, 0.0, 0.0]),
            entry(4, "ana", &[0.6, 0.0, 0.0]),
            entry(5, "ana", &[0.5, 0.0, 0.0]),
        ];
        let hit = find_match(&probe, &gallery, 0.4, 3).unwrap();
        // Mean of the three best scores only; weaker samples are excluded.
        assert!((hit.score - 0.8).abs() < 1e-6);
        // Representative sample is the best of the averaged set.
        assert_eq!(hit.sample_id, 1);
    }

    #[test]
    fn test_best_identity_wins_across_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            entry(1, "ana", &[1.0, 0.0, 0.0]),
            entry(2, "bo", &[0.0, 1.0, 0.0]),
        ];
        let hit = find_match(&probe, &gallery, 0.4, 3).unwrap();
        assert_eq!(hit.name, "ana");
        assert!((hit.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_dimension_is_skipped() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            // Wrong dimension; a raw dot product here would dominate.
            entry(1, "zed", &[5.0, 5.0]),
            entry(2, "ana", &[0.9, 0.0, 0.0]),
        ];
        let hit = find_match(&probe, &gallery, 0.4, 3).unwrap();
        assert_eq!(hit.name, "ana");
    }

    #[test]
    fn test_all_entries_mismatched_matches_nothing() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![entry(1, "zed", &[1.0, 0.0])];
        assert_eq!(find_match(&probe, &gallery, 0.1, 3), None);
    }

    #[test]
    fn test_tie_breaks_on_smaller_name() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let forward = vec![
            entry(1, "bo", &[0.9, 0.0, 0.0]),
            entry(2, "ana", &[0.9, 0.0, 0.0]),
        ];
        let reversed: Vec<_> = forward.iter().rev().cloned().collect();

        let hit = find_match(&probe, &forward, 0.4, 3).unwrap();
        assert_eq!(hit.name, "ana");
        // Same winner regardless of gallery order.
        let hit = find_match(&probe, &reversed, 0.4, 3).unwrap();
        assert_eq!(hit.name, "ana");
    }

    #[test]
    fn test_top_k_zero_is_clamped_to_one() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            entry(1, "ana", &[0.9, 0.0, 0.0]),
            entry(2, "ana", &[0.5, 0.0, 0.0]),
        ];
        let hit = find_match(&probe, &gallery, 0.4, 0).unwrap();
        assert!((hit.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_nickname_carried_through() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![GalleryEntry {
            sample_id: 9,
            name: "ana".to_string(),
            nickname: Some("An".to_string()),
            embedding: Embedding::new(vec![0.9, 0.0]),
        }];
        let hit = find_match(&probe, &gallery, 0.4, 3).unwrap();
        assert_eq!(hit.nickname.as_deref(), Some("An"));
    }
}
