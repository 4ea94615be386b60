//! Cosine-similarity ranking of members against a position.

use serde::{Deserialize, Serialize};

use crate::latent_space::MemberId;

/// One ranked member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberMatch {
    pub member_id: MemberId,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f64,
    /// 1-based position in the ranking.
    pub rank: usize,
}

/// Cosine similarity of two vectors.
///
/// Zero when either vector is all zeros, or the lengths differ. Each vector
/// is divided by its largest absolute component first, so tiny or huge
/// magnitudes neither underflow nor overflow the norms.
#[inline]
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let scale_a = max_abs(a);
    let scale_b = max_abs(b);
    if scale_a == 0.0 || scale_b == 0.0 {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (x, y) in a.iter().zip(b) {
        let (x, y) = (x / scale_a, y / scale_b);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m: f64, x| m.max(x.abs()))
}

/// Rank `members` by similarity to `user_vector`, best first.
///
/// Equal similarities keep input order. `top_k = None` keeps every member.
pub fn rank<'a, I>(user_vector: &[f64], members: I, top_k: Option<usize>) -> Vec<MemberMatch>
where
    I: IntoIterator<Item = (&'a str, &'a [f64])>,
{
    let mut scored: Vec<(&str, f64)> = members
        .into_iter()
        .map(|(id, vector)| (id, cosine_similarity(user_vector, vector)))
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    if let Some(k) = top_k {
        scored.truncate(k);
    }

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (member_id, similarity))| MemberMatch {
            member_id: member_id.to_string(),
            similarity,
            rank: i + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_identities() {
        let v = [0.3, -1.2, 2.0];
        let neg: Vec<f64> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-12);
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&v, &[0.0, 0.0, 0.0]), 0.0);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-12);
    }

    #[test]
    fn tiny_and_huge_vectors_keep_their_direction() {
        let tiny = [1e-9, 2e-9];
        assert!((cosine_similarity(&tiny, &tiny) - 1.0).abs() < 1e-12);
        let subnormal = [1e-310, -1e-310];
        assert!((cosine_similarity(&subnormal, &subnormal) - 1.0).abs() < 1e-12);
        assert!((cosine_similarity(&subnormal, &[-1.0, 1.0]) + 1.0).abs() < 1e-12);
        let huge = [1e200, 1e200];
        assert!((cosine_similarity(&huge, &[3.0, 3.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn matching_direction_ranks_first() {
        let members: Vec<(&str, Vec<f64>)> = vec![
            ("far", vec![-1.0, 0.5]),
            ("twin", vec![2.0, -2.0]),
            ("near", vec![1.0, -0.5]),
        ];
        let ranked = rank(
            &[0.99, -0.99],
            members.iter().map(|(id, v)| (*id, v.as_slice())),
            None,
        );
        assert_eq!(ranked[0].member_id, "twin");
        assert!((ranked[0].similarity - 1.0).abs() < 1e-9);
        assert_eq!(ranked[1].member_id, "near");
        assert_eq!(ranked[2].member_id, "far");
        let ranks: Vec<usize> = ranked.iter().map(|m| m.rank).collect();
        assert_eq!(ranks, [1, 2, 3]);
    }

    #[test]
    fn ties_keep_input_order_and_top_k_truncates() {
        let members: Vec<(&str, Vec<f64>)> = vec![
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.0, 1.0]),
            ("c", vec![2.0, 0.0]),
            ("d", vec![0.0, 3.0]),
        ];
        let ranked = rank(
            &[0.0, 0.0],
            members.iter().map(|(id, v)| (*id, v.as_slice())),
            Some(3),
        );
        let ids: Vec<&str> = ranked.iter().map(|m| m.member_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(ranked.iter().all(|m| m.similarity == 0.0));
    }

    #[test]
    fn top_k_larger_than_members_keeps_all() {
        let members: Vec<(&str, Vec<f64>)> = vec![("a", vec![1.0])];
        let ranked = rank(&[1.0], members.iter().map(|(id, v)| (*id, v.as_slice())), Some(20));
        assert_eq!(ranked.len(), 1);
    }
}
