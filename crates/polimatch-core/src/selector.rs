//! Greedy question selection.
//!
//! Each candidate bill is scored by how much of its loading falls on
//! dimensions we are still unsure about, boosted by how well it separates
//! members:
//!
//! ```text
//! alignment   = Σ_d |loading[d]| × uncertainty[d]
//! controversy = Var_members( dot(member, loading) )
//! score       = alignment × (1 + √controversy)
//! ```
//!
//! The target dimension is the one contributing the largest single alignment
//! term. One-step lookahead only: the selector never models what asking two
//! bills together would reveal, and never backtracks.

use serde::{Deserialize, Serialize};

use crate::latent_space::{BillId, LatentSpace};

// =============================================================================
// Proposal
// =============================================================================

/// The next bill to ask, with the reasoning behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionProposal {
    pub bill_id: BillId,
    /// Zero-based dimension the question mostly informs.
    pub target_dimension: usize,
    pub alignment: f64,
    pub controversy: f64,
    pub score: f64,
    /// Human-readable explanation naming the dimension and controversy.
    pub rationale: String,
}

/// Alignment terms of one bill against the current uncertainty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub total: f64,
    pub target_dimension: usize,
}

/// `Σ_d |loading[d]| × uncertainty[d]`, plus the arg-max term.
///
/// Ties for the largest term go to the lowest dimension.
pub fn alignment(loading: &[f64], uncertainty: &[f64]) -> Alignment {
    let mut total = 0.0;
    let mut best_term = f64::NEG_INFINITY;
    let mut target_dimension = 0;
    for (d, (l, u)) in loading.iter().zip(uncertainty).enumerate() {
        let term = l.abs() * u;
        total += term;
        if term > best_term {
            best_term = term;
            target_dimension = d;
        }
    }
    Alignment {
        total,
        target_dimension,
    }
}

/// Combine alignment and controversy into the selection score.
pub fn selection_score(alignment: f64, controversy: f64) -> f64 {
    alignment * (1.0 + controversy.max(0.0).sqrt())
}

fn propose(bill_id: &str, loading: &[f64], controversy: f64, uncertainty: &[f64]) -> QuestionProposal {
    let aligned = alignment(loading, uncertainty);
    let score = selection_score(aligned.total, controversy);
    let rationale = format!(
        "Targets dimension {} (uncertainty {:.2}); member controversy {:.3}",
        aligned.target_dimension + 1,
        uncertainty[aligned.target_dimension],
        controversy
    );
    QuestionProposal {
        bill_id: bill_id.to_string(),
        target_dimension: aligned.target_dimension,
        alignment: aligned.total,
        controversy,
        score,
        rationale,
    }
}

// =============================================================================
// Selection
// =============================================================================

/// Pick the highest-scoring bill for which `is_excluded` is false.
///
/// Ties go to the bill that comes first in the space. Returns `None` when
/// every bill is excluded.
///
/// # Panics
///
/// If `uncertainty` does not have one entry per dimension of `space`.
pub fn select_next<F>(space: &LatentSpace, uncertainty: &[f64], is_excluded: F) -> Option<QuestionProposal>
where
    F: Fn(&str) -> bool,
{
    assert_eq!(
        uncertainty.len(),
        space.dimensions(),
        "uncertainty length must match space dimensions"
    );

    let mut best: Option<(&str, &[f64], f64, f64)> = None;
    for (bill_id, loading, controversy) in space.bills() {
        if is_excluded(bill_id) {
            continue;
        }
        let score = selection_score(alignment(loading, uncertainty).total, controversy);
        if best.is_none_or(|(_, _, _, best_score)| score > best_score) {
            best = Some((bill_id, loading, controversy, score));
        }
    }

    best.map(|(bill_id, loading, controversy, _)| propose(bill_id, loading, controversy, uncertainty))
}

/// Every eligible bill as a proposal, best first.
///
/// The sort is stable, so equal scores keep space order and the head of the
/// list always equals [`select_next`].
pub fn rank_candidates<F>(space: &LatentSpace, uncertainty: &[f64], is_excluded: F) -> Vec<QuestionProposal>
where
    F: Fn(&str) -> bool,
{
    assert_eq!(
        uncertainty.len(),
        space.dimensions(),
        "uncertainty length must match space dimensions"
    );

    let mut proposals: Vec<QuestionProposal> = space
        .bills()
        .filter(|(bill_id, _, _)| !is_excluded(bill_id))
        .map(|(bill_id, loading, controversy)| propose(bill_id, loading, controversy, uncertainty))
        .collect();

    proposals.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    proposals
}
