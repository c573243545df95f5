//! Probe-to-gallery matching over an index snapshot.

use crate::types::{Embedding, IndexEntry, MatchResult};

/// Strategy for finding the best gallery entry for a probe embedding.
///
/// The trait is the seam that hides the scan: callers hand over a snapshot's
/// entries and a threshold and get a [`MatchResult`] back, so a future
/// approximate-nearest-neighbor index can replace the linear scan without
/// touching any caller.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, entries: &[IndexEntry], threshold: f32) -> MatchResult;
}

/// Exhaustive linear scan over every entry.
///
/// Linear in gallery size per probe, which is fine for a bounded gallery of
/// stored images. Ties on exactly equal minimum distance break toward the
/// lexicographically smallest owner id, so repeated calls with identical
/// inputs always return the identical result.
pub struct ScanMatcher;

impl Matcher for ScanMatcher {
    fn best_match(&self, probe: &Embedding, entries: &[IndexEntry], threshold: f32) -> MatchResult {
        let mut best: Option<(&IndexEntry, f32)> = None;

        for entry in entries {
            let distance = probe.cosine_distance(&entry.embedding);
            let is_better = match best {
                None => true,
                Some((cur, cur_distance)) => {
                    distance < cur_distance
                        || (distance == cur_distance && entry.owner_id < cur.owner_id)
                }
            };
            if is_better {
                best = Some((entry, distance));
            }
        }

        match best {
            Some((entry, distance)) if distance <= threshold => MatchResult {
                matched: true,
                owner_id: Some(entry.owner_id.clone()),
                distance,
                threshold,
            },
            Some((_, distance)) => MatchResult {
                matched: false,
                owner_id: None,
                distance,
                threshold,
            },
            None => MatchResult {
                matched: false,
                owner_id: None,
                distance: f32::INFINITY,
                threshold,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, values: Vec<f32>) -> IndexEntry {
        IndexEntry {
            owner_id: id.to_string(),
            embedding: Embedding::from_raw(values),
        }
    }

    #[test]
    fn test_best_match_selects_minimum_distance() {
        let probe = Embedding::from_raw(vec![1.0, 0.0, 0.0]);
        let entries = vec![
            entry("far.jpg", vec![0.0, 1.0, 0.0]),
            entry("near.jpg", vec![1.0, 0.1, 0.0]),
            entry("opposite.jpg", vec![-1.0, 0.0, 0.0]),
        ];

        let result = ScanMatcher.best_match(&probe, &entries, 0.6);
        assert!(result.matched);
        assert_eq!(result.owner_id.as_deref(), Some("near.jpg"));
        assert!(result.distance < 0.01);
    }

    #[test]
    fn test_no_match_still_reports_closest_distance() {
        let probe = Embedding::from_raw(vec![1.0, 0.0]);
        let entries = vec![entry("other.jpg", vec![0.0, 1.0])];

        let result = ScanMatcher.best_match(&probe, &entries, 0.6);
        assert!(!result.matched);
        assert!(result.owner_id.is_none());
        assert!((result.distance - 1.0).abs() < 1e-6);
        assert_eq!(result.threshold, 0.6);
    }

    #[test]
    fn test_empty_snapshot_never_matches() {
        let probe = Embedding::from_raw(vec![1.0, 0.0]);
        for threshold in [0.0, 0.6, 1.0, f32::MAX] {
            let result = ScanMatcher.best_match(&probe, &[], threshold);
            assert!(!result.matched);
            assert!(result.owner_id.is_none());
            assert!(result.distance.is_infinite());
        }
    }

    #[test]
    fn test_distance_equal_to_threshold_matches() {
        // Orthogonal vectors sit at distance exactly 1.0.
        let probe = Embedding::from_raw(vec![1.0, 0.0]);
        let entries = vec![entry("edge.jpg", vec![0.0, 1.0])];

        let result = ScanMatcher.best_match(&probe, &entries, 1.0);
        assert!(result.matched);
        assert_eq!(result.owner_id.as_deref(), Some("edge.jpg"));
    }

    #[test]
    fn test_tie_breaks_to_lexicographically_smallest_id() {
        let probe = Embedding::from_raw(vec![1.0, 0.0]);
        // Identical embeddings, so identical distances.
        let entries = vec![
            entry("zeta.jpg", vec![1.0, 0.0]),
            entry("alpha.jpg", vec![1.0, 0.0]),
            entry("mid.jpg", vec![1.0, 0.0]),
        ];

        let result = ScanMatcher.best_match(&probe, &entries, 0.6);
        assert!(result.matched);
        assert_eq!(result.owner_id.as_deref(), Some("alpha.jpg"));

        // Entry order must not change the outcome.
        let reversed: Vec<IndexEntry> = entries.into_iter().rev().collect();
        let again = ScanMatcher.best_match(&probe, &reversed, 0.6);
        assert_eq!(again.owner_id.as_deref(), Some("alpha.jpg"));
    }

    #[test]
    fn test_deterministic_across_repeated_calls() {
        let probe = Embedding::from_raw(vec![0.6, 0.8]);
        let entries = vec![
            entry("a.jpg", vec![0.8, 0.6]),
            entry("b.jpg", vec![0.6, 0.8]),
            entry("c.jpg", vec![1.0, 0.0]),
        ];

        let first = ScanMatcher.best_match(&probe, &entries, 0.6);
        for _ in 0..10 {
            let next = ScanMatcher.best_match(&probe, &entries, 0.6);
            assert_eq!(next.matched, first.matched);
            assert_eq!(next.owner_id, first.owner_id);
            assert_eq!(next.distance, first.distance);
        }
    }
}
