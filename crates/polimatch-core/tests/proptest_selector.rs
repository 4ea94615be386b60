//! Property-based tests for question selection.
//!
//! Validates:
//! 1. Head agreement: select_next equals the head of rank_candidates
//! 2. Ordering: candidate scores are non-increasing
//! 3. Exclusion: excluded bills are never proposed
//! 4. Exhaustion: excluding every bill yields no proposal
//! 5. Bounds: target dimension is in range, scores are non-negative
//! 6. Controversy monotone: more controversy never lowers the score
//! 7. Uncertainty monotone: raising uncertainty never lowers alignment

use std::collections::HashSet;

use proptest::prelude::*;

use polimatch_core::latent_space::LatentSpace;
use polimatch_core::selector::{alignment, rank_candidates, select_next, selection_score};

// =============================================================================
// Strategies
// =============================================================================

fn arb_vectors(dims: usize, len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<Vec<f64>>> {
    proptest::collection::vec(proptest::collection::vec(-1.0_f64..1.0, dims), len)
}

/// A space together with an uncertainty vector of matching length.
fn arb_space() -> impl Strategy<Value = (LatentSpace, Vec<f64>)> {
    (1_usize..=3)
        .prop_flat_map(|dims| {
            (
                Just(dims),
                arb_vectors(dims, 1..10),
                arb_vectors(dims, 2..8),
                proptest::collection::vec(0.01_f64..=1.0, dims),
            )
        })
        .prop_map(|(dims, loadings, members, uncertainty)| {
            let bills = loadings
                .into_iter()
                .enumerate()
                .map(|(i, l)| (format!("b{i}"), l))
                .collect();
            let members = members
                .into_iter()
                .enumerate()
                .map(|(i, v)| (format!("m{i}"), v))
                .collect();
            let space = LatentSpace::new("p:0", dims, bills, members, vec![1.0 / dims as f64; dims])
                .expect("generated space is well formed");
            (space, uncertainty)
        })
}

// =============================================================================
// Property: select_next agrees with rank_candidates
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn select_next_is_head_of_ranking((space, uncertainty) in arb_space()) {
        let ranked = rank_candidates(&space, &uncertainty, |_| false);
        let next = select_next(&space, &uncertainty, |_| false);
        prop_assert_eq!(ranked.len(), space.bill_count());
        prop_assert_eq!(ranked.first(), next.as_ref());
    }

    #[test]
    fn candidates_are_sorted_best_first((space, uncertainty) in arb_space()) {
        let ranked = rank_candidates(&space, &uncertainty, |_| false);
        for pair in ranked.windows(2) {
            prop_assert!(
                pair[0].score >= pair[1].score,
                "{} ({}) ranked above {} ({})",
                pair[0].bill_id, pair[0].score, pair[1].bill_id, pair[1].score
            );
        }
    }

    #[test]
    fn proposals_are_well_formed((space, uncertainty) in arb_space()) {
        for proposal in rank_candidates(&space, &uncertainty, |_| false) {
            prop_assert!(proposal.target_dimension < space.dimensions());
            prop_assert!(proposal.score >= 0.0, "negative score {}", proposal.score);
            prop_assert!(proposal.controversy >= 0.0);
            prop_assert!(space.contains_bill(&proposal.bill_id));
        }
    }
}

// =============================================================================
// Property: exclusion
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn excluded_bills_are_never_proposed(
        (space, uncertainty) in arb_space(),
        mask in proptest::collection::vec(any::<bool>(), 10),
    ) {
        let excluded: HashSet<String> = space
            .bills()
            .enumerate()
            .filter(|(i, _)| mask[*i])
            .map(|(_, (id, _, _))| id.to_string())
            .collect();
        let is_excluded = |id: &str| excluded.contains(id);

        let ranked = rank_candidates(&space, &uncertainty, is_excluded);
        prop_assert_eq!(ranked.len(), space.bill_count() - excluded.len());
        for proposal in &ranked {
            prop_assert!(!excluded.contains(&proposal.bill_id));
        }

        let next = select_next(&space, &uncertainty, is_excluded);
        if excluded.len() == space.bill_count() {
            prop_assert!(next.is_none());
        } else {
            let next = next.expect("an eligible bill remains");
            prop_assert!(!excluded.contains(&next.bill_id));
        }
    }
}

// =============================================================================
// Property: score monotonicity
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn controversy_never_lowers_score(
        align in 0.0_f64..5.0,
        low in 0.0_f64..2.0,
        bump in 0.0_f64..2.0,
    ) {
        prop_assert!(selection_score(align, low + bump) >= selection_score(align, low));
        prop_assert!(selection_score(align, low) >= align);
    }

    #[test]
    fn uncertainty_never_lowers_alignment(
        loading in proptest::collection::vec(-1.0_f64..1.0, 3),
        uncertainty in proptest::collection::vec(0.0_f64..1.0, 3),
        bump in proptest::collection::vec(0.0_f64..1.0, 3),
    ) {
        let raised: Vec<f64> = uncertainty.iter().zip(&bump).map(|(u, b)| u + b).collect();
        let before = alignment(&loading, &uncertainty);
        let after = alignment(&loading, &raised);
        prop_assert!(after.total >= before.total - 1e-12);
        prop_assert!(before.target_dimension < 3);
    }
}
