//! Ridge estimation of a respondent's position from their answers.
//!
//! # Model
//!
//! Each answered bill contributes one row of the design matrix `V` (the bill's
//! loading) and one target (the score in {-1, 0, 1}). The position is the
//! solution of the regularized normal equations:
//!
//! ```text
//! (VᵗV + λI) z = Vᵗ s
//! ```
//!
//! `λ > 0` keeps the system positive definite even with fewer answers than
//! dimensions, so the solve never fails on a singular `VᵗV`.
//!
//! # Uncertainty
//!
//! Per dimension, `1 / max(VᵗV[i][i], floor)`, scaled by the prior maximum
//! `1 / floor`:
//!
//! ```text
//! u[i] = floor / max(VᵗV[i][i], floor)      ∈ (0, 1]
//! ```
//!
//! No evidence anywhere gives 1.0 in every dimension; evidence only ever
//! lowers a dimension's value.
//!
//! The system is rebuilt from scratch on every call. With at most a handful
//! of dimensions and a few dozen answers this costs microseconds.

use serde::{Deserialize, Serialize};

use crate::answers::UserAnswer;
use crate::config::EngineConfig;

/// Pivot magnitude below which a column is treated as degenerate.
const PIVOT_EPSILON: f64 = 1e-12;

/// Numeric parameters of the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorParams {
    /// Ridge term λ.
    pub regularization: f64,
    /// Minimum evidence used when converting to uncertainty.
    pub uncertainty_floor: f64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            regularization: 0.01,
            uncertainty_floor: 0.1,
        }
    }
}

impl From<&EngineConfig> for EstimatorParams {
    fn from(config: &EngineConfig) -> Self {
        Self {
            regularization: config.regularization,
            uncertainty_floor: config.uncertainty_floor,
        }
    }
}

/// Estimated position plus per-dimension uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub user_vector: Vec<f64>,
    pub uncertainty: Vec<f64>,
    /// Diagonal of `VᵗV`: accumulated squared loading per dimension.
    pub evidence: Vec<f64>,
    /// Answers that contributed a row (unknown bills are skipped).
    pub rows_used: usize,
}

impl Estimate {
    /// Zero vector with maximal uncertainty.
    #[must_use]
    pub fn prior(dims: usize) -> Self {
        Self {
            user_vector: vec![0.0; dims],
            uncertainty: vec![1.0; dims],
            evidence: vec![0.0; dims],
            rows_used: 0,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.user_vector.len()
    }

    /// Largest per-dimension uncertainty.
    pub fn max_uncertainty(&self) -> f64 {
        self.uncertainty.iter().copied().fold(0.0, f64::max)
    }
}

/// Estimate a position from `answers`.
///
/// `loading_of` resolves a bill's loading; answers whose bill it does not
/// know are skipped. Pure: identical inputs give identical outputs.
///
/// # Panics
///
/// If `dims == 0` or a resolved loading is not `dims` long. Both are
/// programmer errors: [`crate::latent_space::LatentSpace`] guarantees shapes.
pub fn estimate<'a, 's, I, F>(
    answers: I,
    mut loading_of: F,
    dims: usize,
    params: &EstimatorParams,
) -> Estimate
where
    I: IntoIterator<Item = &'a UserAnswer>,
    F: FnMut(&str) -> Option<&'s [f64]>,
{
    assert!(dims > 0, "estimator requires at least one dimension");

    let mut gram = vec![vec![0.0; dims]; dims];
    let mut rhs = vec![0.0; dims];
    let mut rows_used = 0;

    for answer in answers {
        let Some(loading) = loading_of(&answer.bill_id) else {
            continue;
        };
        assert_eq!(
            loading.len(),
            dims,
            "loading for bill {} has wrong length",
            answer.bill_id
        );
        let target = answer.score.value();
        for i in 0..dims {
            rhs[i] += loading[i] * target;
            for j in 0..dims {
                gram[i][j] += loading[i] * loading[j];
            }
        }
        rows_used += 1;
    }

    if rows_used == 0 {
        return Estimate::prior(dims);
    }

    let evidence: Vec<f64> = (0..dims).map(|i| gram[i][i]).collect();

    let mut system = gram;
    for (i, row) in system.iter_mut().enumerate() {
        row[i] += params.regularization;
    }
    let user_vector = solve_linear_system(system, rhs);
    let uncertainty = normalized_uncertainty(&evidence, params.uncertainty_floor);

    Estimate {
        user_vector,
        uncertainty,
        evidence,
        rows_used,
    }
}

/// Map accumulated evidence to uncertainty in `(0, 1]`.
pub fn normalized_uncertainty(evidence: &[f64], floor: f64) -> Vec<f64> {
    evidence
        .iter()
        .map(|&e| {
            let raw = 1.0 / e.max(floor);
            (raw * floor).clamp(0.0, 1.0)
        })
        .collect()
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting.
///
/// A degenerate pivot yields the zero vector instead of an error; so does any
/// non-finite component of the result.
pub fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Vec<f64> {
    let n = b.len();

    // Forward elimination with partial pivoting
    for i in 0..n {
        let mut max_row = i;
        let mut max_val = a[i][i].abs();
        for k in (i + 1)..n {
            if a[k][i].abs() > max_val {
                max_val = a[k][i].abs();
                max_row = k;
            }
        }
        a.swap(i, max_row);
        b.swap(i, max_row);

        if a[i][i].abs() < PIVOT_EPSILON {
            tracing::debug!(column = i, "Degenerate pivot; returning zero solution");
            return vec![0.0; n];
        }

        for k in (i + 1)..n {
            let factor = a[k][i] / a[i][i];
            for j in i..n {
                a[k][j] -= factor * a[i][j];
            }
            b[k] -= factor * b[i];
        }
    }

    // Back substitution
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= a[i][j] * x[j];
        }
        x[i] = sum / a[i][i];
        if !x[i].is_finite() {
            x[i] = 0.0;
        }
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answers::Score;
    use std::collections::HashMap;

    fn loadings(entries: &[(&str, &[f64])]) -> HashMap<String, Vec<f64>> {
        entries
            .iter()
            .map(|(id, l)| ((*id).to_string(), l.to_vec()))
            .collect()
    }

    fn run(answers: &[UserAnswer], table: &HashMap<String, Vec<f64>>, dims: usize) -> Estimate {
        estimate(
            answers,
            |id| table.get(id).map(Vec::as_slice),
            dims,
            &EstimatorParams::default(),
        )
    }

    // -------------------------------------------------------------------------
    // Prior
    // -------------------------------------------------------------------------

    #[test]
    fn empty_answers_give_prior() {
        let table = loadings(&[]);
        for dims in 1..=5 {
            let est = run(&[], &table, dims);
            assert_eq!(est, Estimate::prior(dims));
            assert_eq!(est.user_vector, vec![0.0; dims]);
            assert_eq!(est.uncertainty, vec![1.0; dims]);
        }
    }

    #[test]
    fn unknown_bills_are_skipped() {
        let table = loadings(&[("B1", &[1.0, 0.0])]);
        let answers = vec![
            UserAnswer::new("ghost", Score::Agree),
            UserAnswer::new("B1", Score::Agree),
        ];
        let est = run(&answers, &table, 2);
        assert_eq!(est.rows_used, 1);
        assert!((est.user_vector[0] - 1.0 / 1.01).abs() < 1e-9);

        let only_unknown = run(&answers[..1], &table, 2);
        assert_eq!(only_unknown, Estimate::prior(2));
    }

    // -------------------------------------------------------------------------
    // Solutions
    // -------------------------------------------------------------------------

    #[test]
    fn orthogonal_bills_solve_independently() {
        let table = loadings(&[("B1", &[1.0, 0.0]), ("B2", &[0.0, 1.0])]);
        let answers = vec![
            UserAnswer::new("B1", Score::Agree),
            UserAnswer::new("B2", Score::Disagree),
        ];
        let est = run(&answers, &table, 2);

        let expected = 1.0 / 1.01;
        assert!((est.user_vector[0] - expected).abs() < 1e-9);
        assert!((est.user_vector[1] + expected).abs() < 1e-9);
        assert!((est.user_vector[0] - 0.990).abs() < 1e-3);

        assert!((est.uncertainty[0] - est.uncertainty[1]).abs() < 1e-12);
        assert!(est.uncertainty[0] < 1.0);
    }

    #[test]
    fn correlated_loadings_share_evidence() {
        let table = loadings(&[("B", &[1.0, 1.0])]);
        let est = run(&[UserAnswer::new("B", Score::Agree)], &table, 2);
        let expected = 1.0 / 2.01;
        assert!((est.user_vector[0] - expected).abs() < 1e-9);
        assert!((est.user_vector[1] - expected).abs() < 1e-9);
    }

    #[test]
    fn underdetermined_system_stays_finite() {
        let table = loadings(&[("B", &[0.3, -0.2, 0.1])]);
        let est = run(&[UserAnswer::new("B", Score::Agree)], &table, 3);
        assert!(est.user_vector.iter().all(|v| v.is_finite()));
        assert!(est.user_vector[0] > 0.0);
        assert!(est.user_vector[1] < 0.0);
    }

    #[test]
    fn abstain_pulls_towards_zero() {
        let table = loadings(&[("B1", &[1.0]), ("B2", &[1.0])]);
        let agree_only = run(&[UserAnswer::new("B1", Score::Agree)], &table, 1);
        let with_abstain = run(
            &[
                UserAnswer::new("B1", Score::Agree),
                UserAnswer::new("B2", Score::Abstain),
            ],
            &table,
            1,
        );
        assert!(with_abstain.user_vector[0] < agree_only.user_vector[0]);
        assert!(with_abstain.user_vector[0] > 0.0);
    }

    #[test]
    fn answer_order_does_not_change_result() {
        let table = loadings(&[("B1", &[0.7, 0.2]), ("B2", &[-0.1, 0.9]), ("B3", &[0.4, 0.4])]);
        let forward = vec![
            UserAnswer::new("B1", Score::Agree),
            UserAnswer::new("B2", Score::Disagree),
            UserAnswer::new("B3", Score::Agree),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();
        let a = run(&forward, &table, 2);
        let b = run(&reversed, &table, 2);
        for (x, y) in a.user_vector.iter().zip(&b.user_vector) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    // -------------------------------------------------------------------------
    // Uncertainty
    // -------------------------------------------------------------------------

    #[test]
    fn uncertainty_drops_only_where_evidence_lands() {
        let table = loadings(&[("B1", &[1.0, 0.0, 0.0])]);
        let est = run(&[UserAnswer::new("B1", Score::Agree)], &table, 3);
        assert!((est.uncertainty[0] - 0.1).abs() < 1e-12);
        assert_eq!(est.uncertainty[1], 1.0);
        assert_eq!(est.uncertainty[2], 1.0);
    }

    #[test]
    fn normalized_uncertainty_is_bounded() {
        let u = normalized_uncertainty(&[0.0, 0.05, 0.1, 2.0, 1e9], 0.1);
        assert_eq!(u[0], 1.0);
        assert_eq!(u[1], 1.0);
        assert!((u[2] - 1.0).abs() < 1e-12);
        assert!((u[3] - 0.05).abs() < 1e-12);
        assert!(u.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    // -------------------------------------------------------------------------
    // Linear solve
    // -------------------------------------------------------------------------

    #[test]
    fn solve_requires_pivoting() {
        // Zero in the top-left forces a row swap.
        let a = vec![vec![0.0, 2.0], vec![3.0, 1.0]];
        let x = solve_linear_system(a, vec![4.0, 5.0]);
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn singular_system_returns_zeros() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        let x = solve_linear_system(a, vec![1.0, 2.0]);
        assert_eq!(x, vec![0.0, 0.0]);
    }

    #[test]
    fn params_follow_engine_config() {
        let config = EngineConfig {
            regularization: 0.5,
            uncertainty_floor: 0.2,
            ..EngineConfig::default()
        };
        let params = EstimatorParams::from(&config);
        assert!((params.regularization - 0.5).abs() < 1e-12);
        assert!((params.uncertainty_floor - 0.2).abs() < 1e-12);
    }
}
