//! Cross-space aggregation of completed sessions.
//!
//! ```text
//! W            = Σ_c importance_c
//! global(m)    = Σ_c (importance_c / W) × similarity_c(m)
//! ```
//!
//! A member absent from a space contributes 0 for that space. Since every
//! similarity lies in `[-1, 1]` and the weights sum to 1, so does every
//! global score.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::answers::UserAnswer;
use crate::error::ValidationError;
use crate::latent_space::{MemberId, SpaceId};
use crate::ranker::MemberMatch;

/// Respondent-assigned weight of one space, in `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Importance(u8);

impl Importance {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;
    pub const DEFAULT: Self = Self(3);

    pub fn new(value: u8) -> Result<Self, ValidationError> {
        Self::try_from(i64::from(value))
    }

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn weight(self) -> f64 {
        f64::from(self.0)
    }
}

impl Default for Importance {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for Importance {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            // In range, so the cast is lossless.
            Ok(Self(value as u8))
        } else {
            Err(ValidationError::ImportanceOutOfRange(value))
        }
    }
}

impl From<Importance> for u8 {
    fn from(importance: Importance) -> Self {
        importance.0
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Finalized outcome of one session. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResult {
    pub space_id: SpaceId,
    /// Full ranking of the space's members.
    pub matches: Vec<MemberMatch>,
    pub answered_count: usize,
    pub importance: Importance,
    pub user_vector: Vec<f64>,
    /// Answers in first-answered order.
    pub answers: Vec<UserAnswer>,
}

impl ClusterResult {
    pub fn similarity_of(&self, member_id: &str) -> Option<f64> {
        self.matches
            .iter()
            .find(|m| m.member_id == member_id)
            .map(|m| m.similarity)
    }
}

/// One member's importance-weighted score across spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMemberScore {
    pub member_id: MemberId,
    pub global_score: f64,
    /// Similarity in each space where the member was ranked.
    pub per_space_scores: BTreeMap<SpaceId, f64>,
}

/// Fold completed results into one global ranking, best first.
///
/// Members are collected in first-seen order (result order, then rank order)
/// and equal scores keep that order. Empty input, or a total weight of zero,
/// yields an empty ranking.
pub fn aggregate(results: &[ClusterResult]) -> Vec<GlobalMemberScore> {
    let total_weight: f64 = results.iter().map(|r| r.importance.weight()).sum();
    if total_weight <= 0.0 {
        return Vec::new();
    }

    let mut order: Vec<MemberId> = Vec::new();
    let mut scores: HashMap<MemberId, GlobalMemberScore> = HashMap::new();

    for result in results {
        let weight = result.importance.weight() / total_weight;
        for m in &result.matches {
            let entry = scores.entry(m.member_id.clone()).or_insert_with(|| {
                order.push(m.member_id.clone());
                GlobalMemberScore {
                    member_id: m.member_id.clone(),
                    global_score: 0.0,
                    per_space_scores: BTreeMap::new(),
                }
            });
            entry.global_score += weight * m.similarity;
            entry
                .per_space_scores
                .insert(result.space_id.clone(), m.similarity);
        }
    }

    let mut ranked: Vec<GlobalMemberScore> = order
        .iter()
        .filter_map(|id| scores.remove(id))
        .collect();
    ranked.sort_by(|a, b| {
        b.global_score
            .partial_cmp(&a.global_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    tracing::debug!(
        spaces = results.len(),
        members = ranked.len(),
        total_weight,
        "Aggregated cluster results"
    );
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(space_id: &str, importance: u8, matches: &[(&str, f64)]) -> ClusterResult {
        ClusterResult {
            space_id: space_id.to_string(),
            matches: matches
                .iter()
                .enumerate()
                .map(|(i, (id, similarity))| MemberMatch {
                    member_id: (*id).to_string(),
                    similarity: *similarity,
                    rank: i + 1,
                })
                .collect(),
            answered_count: 3,
            importance: Importance::new(importance).unwrap(),
            user_vector: vec![0.0],
            answers: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Importance
    // -------------------------------------------------------------------------

    #[test]
    fn importance_range() {
        assert_eq!(Importance::default().get(), 3);
        assert!(Importance::new(1).is_ok());
        assert!(Importance::new(5).is_ok());
        assert_eq!(
            Importance::new(0).unwrap_err(),
            ValidationError::ImportanceOutOfRange(0)
        );
        assert!(Importance::try_from(6).is_err());
        assert!(Importance::try_from(-1).is_err());
    }

    #[test]
    fn importance_serde() {
        assert_eq!(serde_json::to_string(&Importance::new(4).unwrap()).unwrap(), "4");
        assert!(serde_json::from_str::<Importance>("9").is_err());
    }

    // -------------------------------------------------------------------------
    // Aggregation
    // -------------------------------------------------------------------------

    #[test]
    fn absent_member_counts_as_zero() {
        let results = vec![
            result("A", 5, &[("m1", 0.8), ("m2", 0.1)]),
            result("B", 1, &[("m2", 0.9)]),
        ];
        let global = aggregate(&results);

        let m1 = global.iter().find(|g| g.member_id == "m1").unwrap();
        assert!((m1.global_score - (5.0 / 6.0) * 0.8).abs() < 1e-12);
        assert!((m1.global_score - 0.667).abs() < 1e-3);
        assert_eq!(m1.per_space_scores.len(), 1);

        let m2 = global.iter().find(|g| g.member_id == "m2").unwrap();
        assert!((m2.global_score - (5.0 / 6.0 * 0.1 + 1.0 / 6.0 * 0.9)).abs() < 1e-12);
        assert_eq!(m2.per_space_scores["B"], 0.9);

        assert_eq!(global[0].member_id, "m1");
    }

    #[test]
    fn equal_scores_keep_first_seen_order() {
        let results = vec![
            result("A", 2, &[("x", 0.5), ("y", 0.5)]),
            result("B", 2, &[("z", 1.0)]),
        ];
        let global = aggregate(&results);
        let ids: Vec<&str> = global.iter().map(|g| g.member_id.as_str()).collect();
        assert_eq!(ids, ["z", "x", "y"]);
    }

    #[test]
    fn empty_input_gives_empty_ranking() {
        assert!(aggregate(&[]).is_empty());
    }

    #[test]
    fn single_space_reproduces_similarities() {
        let results = vec![result("A", 4, &[("x", 0.9), ("y", -0.4)])];
        let global = aggregate(&results);
        assert!((global[0].global_score - 0.9).abs() < 1e-12);
        assert!((global[1].global_score + 0.4).abs() < 1e-12);
    }

    #[test]
    fn similarity_lookup() {
        let r = result("A", 1, &[("x", 0.3)]);
        assert_eq!(r.similarity_of("x"), Some(0.3));
        assert_eq!(r.similarity_of("q"), None);
    }
}
