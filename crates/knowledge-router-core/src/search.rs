//! Similarity ranking shared by every [`VectorStore`](crate::store::VectorStore)
//! backend and the retrieval service.
//!
//! Results are ordered by descending score; equal scores keep insertion
//! order (ascending `seq`). Candidates below `min_score` are dropped
//! before truncating to `k`, so a query never returns more than `k`
//! results and never returns one under the threshold.

use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::models::{Entry, ScoredEntry};

/// Score `(seq, entry)` rows against `query` by cosine similarity.
pub fn score_entries<I>(query: &[f32], rows: I) -> Vec<ScoredEntry>
where
    I: IntoIterator<Item = (u64, Entry)>,
{
    rows.into_iter()
        .map(|(seq, entry)| ScoredEntry {
            score: cosine_similarity(query, &entry.vector),
            entry,
            seq,
        })
        .collect()
}

/// Filter, order, and truncate scored candidates.
pub fn rank(mut candidates: Vec<ScoredEntry>, k: usize, min_score: f32) -> Vec<ScoredEntry> {
    candidates.retain(|c| c.score.is_finite() && c.score >= min_score);
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.seq.cmp(&b.seq))
    });
    candidates.truncate(k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryMetadata;

    fn candidate(id: &str, score: f32, seq: u64) -> ScoredEntry {
        ScoredEntry {
            entry: Entry {
                id: id.to_string(),
                text: id.to_string(),
                vector: Vec::new(),
                metadata: EntryMetadata::new("knowledge", "test@0"),
            },
            score,
            seq,
        }
    }

    fn ids(results: &[ScoredEntry]) -> Vec<&str> {
        results.iter().map(|r| r.entry.id.as_str()).collect()
    }

    #[test]
    fn test_rank_orders_by_score_desc() {
        let ranked = rank(
            vec![candidate("a", 0.2, 0), candidate("b", 0.9, 1), candidate("c", 0.5, 2)],
            10,
            0.0,
        );
        assert_eq!(ids(&ranked), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_rank_ties_keep_insertion_order() {
        let ranked = rank(
            vec![candidate("late", 0.5, 9), candidate("early", 0.5, 1), candidate("mid", 0.5, 4)],
            10,
            0.0,
        );
        assert_eq!(ids(&ranked), vec!["early", "mid", "late"]);
    }

    #[test]
    fn test_rank_filters_then_truncates() {
        let ranked = rank(
            vec![
                candidate("a", 0.95, 0),
                candidate("b", 0.10, 1),
                candidate("c", 0.80, 2),
                candidate("d", 0.70, 3),
            ],
            2,
            0.5,
        );
        assert_eq!(ids(&ranked), vec!["a", "c"]);
        assert!(ranked.iter().all(|r| r.score >= 0.5));
    }

    #[test]
    fn test_rank_threshold_is_inclusive() {
        let ranked = rank(vec![candidate("edge", 0.3, 0)], 5, 0.3);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn test_rank_zero_k_and_no_matches() {
        assert!(rank(vec![candidate("a", 0.9, 0)], 0, 0.0).is_empty());
        assert!(rank(vec![candidate("a", 0.1, 0)], 5, 0.5).is_empty());
    }

    #[test]
    fn test_rank_drops_nan() {
        let ranked = rank(vec![candidate("nan", f32::NAN, 0), candidate("ok", 0.1, 1)], 5, -1.0);
        assert_eq!(ids(&ranked), vec!["ok"]);
    }
}
