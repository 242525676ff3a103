use std::collections::HashMap;

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Reciprocal Rank Fusion of two ranked id lists, best first.
///
/// See [`fuse_scored`] for the scoring rule.
pub fn fuse<S: AsRef<str>>(rank_a: &[S], rank_b: &[S], k: f32) -> Vec<String> {
    fuse_scored(rank_a, rank_b, k)
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

/// Reciprocal Rank Fusion returning each id with its fused score.
///
/// Every appearance at zero-based rank `r` contributes `1 / (k + r + 1)` and
/// contributions are summed per id. Output is ordered by descending score;
/// equal scores keep first-appearance order (all of `rank_a`, then `rank_b`).
/// When one list is empty the other comes back in its own order with
/// duplicates removed.
pub fn fuse_scored<S: AsRef<str>>(rank_a: &[S], rank_b: &[S], k: f32) -> Vec<(String, f32)> {
    // id -> (first appearance, accumulated score)
    let mut scores: HashMap<&str, (usize, f32)> = HashMap::new();
    let mut order = 0usize;

    for list in [rank_a, rank_b] {
        for (rank, id) in list.iter().enumerate() {
            let rrf_score = 1.0 / (k + rank as f32 + 1.0);
            let entry = scores.entry(id.as_ref()).or_insert_with(|| {
                order += 1;
                (order, 0.0)
            });
            entry.1 += rrf_score;
        }
    }

    let mut fused: Vec<(&str, usize, f32)> = scores
        .into_iter()
        .map(|(id, (first, score))| (id, first, score))
        .collect();
    fused.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });

    fused
        .into_iter()
        .map(|(id, _, score)| (id.to_string(), score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const K: f32 = DEFAULT_RRF_K;

    #[test]
    fn test_empty_inputs() {
        let empty: [&str; 0] = [];
        assert!(fuse(&empty, &empty, K).is_empty());
    }

    #[test]
    fn test_one_list_empty_returns_other_unchanged() {
        let empty: [&str; 0] = [];
        assert_eq!(fuse(&["x", "y", "z"], &empty, K), vec!["x", "y", "z"]);
        assert_eq!(fuse(&empty, &["q", "p"], K), vec!["q", "p"]);
    }

    #[test]
    fn test_duplicates_within_a_list_collapse() {
        let empty: [&str; 0] = [];
        assert_eq!(fuse(&["a", "b", "a"], &empty, K), vec!["a", "b"]);
    }

    #[test]
    fn test_both_lists_contribute() {
        // x: 1/61 + 1/62, y: 1/62 + 1/61, z: 1/63
        let fused = fuse(&["x", "y", "z"], &["y", "x"], K);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[2], "z");
        // x and y tie exactly; first appearance wins
        assert_eq!(&fused[..2], &["x", "y"]);
    }

    #[test]
    fn test_shared_id_beats_single_appearance() {
        // b appears in both lists at rank 1
        let fused = fuse(&["a", "b"], &["c", "b"], K);
        assert_eq!(fused[0], "b");
        // a and c tie at 1/61; a appeared first
        assert_eq!(&fused[1..], &["a", "c"]);
    }

    #[test]
    fn test_overlapping_ids_outrank_singletons() {
        // b: 1/62 + 1/61, c: 1/63 + 1/62, a: 1/61, d: 1/63
        let fused = fuse(&["a", "b", "c"], &["b", "c", "d"], 60.0);
        assert_eq!(fused, vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_scores_follow_formula() {
        let scored = fuse_scored(&["a", "b"], &["b"], K);
        let b = scored.iter().find(|(id, _)| id == "b").unwrap().1;
        let expected = 1.0 / (K + 2.0) + 1.0 / (K + 1.0);
        assert!((b - expected).abs() < 1e-6);
        assert_eq!(scored[0].0, "b");
    }

    #[test]
    fn test_smaller_k_sharpens_rank_weight() {
        let a = ["top", "mid"];
        let b = ["mid"];
        // mid is in both lists, top only ranks first in one
        assert_eq!(fuse(&a, &b, 60.0)[0], "mid");
        let sharp = fuse_scored(&a, &b, 1.0);
        let top = sharp.iter().find(|(id, _)| id == "top").unwrap().1;
        assert!((top - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_accepts_owned_strings() {
        let a: Vec<String> = vec!["one".into(), "two".into()];
        let b: Vec<String> = vec!["two".into()];
        assert_eq!(fuse(&a, &b, K), vec!["two", "one"]);
    }
}
