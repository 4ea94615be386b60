//! One respondent working through one latent space.
//!
//! # State machine
//!
//! ```text
//! Created ──start──▶ Questioning ──(limit | converged | exhausted | finish)──▶ AwaitingImportance
//!                      │    ▲                                                    │
//!                      └────┘ answer / skip                          complete(importance)
//!                                                                                ▼
//!                                                                           Completed
//! ```
//!
//! `Questioning` stops on the first of:
//! - `question_count >= max_questions`
//! - every dimension's uncertainty below `uncertainty_threshold`
//! - no bill left that is neither answered nor skipped
//! - an explicit `finish`, once `min_answers_before_finish` answers exist
//!
//! Every operation validates before it mutates; a rejected call leaves the
//! session exactly as it was.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aggregation::{ClusterResult, Importance};
use crate::answers::{AnswerSet, Score, UserAnswer};
use crate::config::EngineConfig;
use crate::error::ValidationError;
use crate::estimator::{Estimate, EstimatorParams, estimate};
use crate::latent_space::{BillId, LatentSpace};
use crate::ranker::{MemberMatch, rank};
use crate::selector::{QuestionProposal, select_next};

// =============================================================================
// States
// =============================================================================

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Questioning,
    AwaitingImportance,
    Completed,
}

impl SessionState {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Questioning => "questioning",
            Self::AwaitingImportance => "awaiting_importance",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why questioning stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    QuestionLimit,
    UncertaintyConverged,
    BillsExhausted,
    EarlyFinish,
}

impl std::fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::QuestionLimit => "question limit reached",
            Self::UncertaintyConverged => "uncertainty converged",
            Self::BillsExhausted => "no bills left",
            Self::EarlyFinish => "finished early",
        };
        f.write_str(text)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Session view returned by `start`, `answer` and `skip`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub next_question: Option<QuestionProposal>,
    pub user_vector: Vec<f64>,
    pub uncertainty: Vec<f64>,
    pub top_matches: Vec<MemberMatch>,
    pub answered_count: usize,
    pub question_count: usize,
    pub is_complete: bool,
    pub completion: Option<CompletionReason>,
}

/// Returned by `finish`: the full ranking at the moment questioning stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishOutcome {
    pub matches: Vec<MemberMatch>,
    pub user_vector: Vec<f64>,
    pub completion: CompletionReason,
}

// =============================================================================
// Session
// =============================================================================

/// Mutable state of one adaptive questionnaire against one space.
///
/// Single-writer: callers serialize operations on a session.
#[derive(Debug, Clone)]
pub struct Session {
    space: Arc<LatentSpace>,
    config: EngineConfig,
    params: EstimatorParams,
    state: SessionState,
    answers: AnswerSet,
    skipped: BTreeSet<BillId>,
    estimate: Estimate,
    top_matches: Vec<MemberMatch>,
    question_count: usize,
    current: Option<QuestionProposal>,
    completion: Option<CompletionReason>,
}

impl Session {
    /// Bind a new session to `space`.
    ///
    /// `dimensions` is what the caller believes the space has; a mismatch is
    /// rejected rather than silently corrected.
    pub fn new(
        space: Arc<LatentSpace>,
        dimensions: usize,
        config: &EngineConfig,
    ) -> Result<Self, ValidationError> {
        if dimensions != space.dimensions() {
            return Err(ValidationError::DimensionMismatch {
                expected: space.dimensions(),
                actual: dimensions,
            });
        }
        Ok(Self {
            estimate: Estimate::prior(dimensions),
            space,
            config: config.clone(),
            params: EstimatorParams::from(config),
            state: SessionState::Created,
            answers: AnswerSet::new(),
            skipped: BTreeSet::new(),
            top_matches: Vec::new(),
            question_count: 0,
            current: None,
            completion: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn space(&self) -> &Arc<LatentSpace> {
        &self.space
    }

    pub fn space_id(&self) -> &str {
        self.space.space_id()
    }

    pub fn dimensions(&self) -> usize {
        self.space.dimensions()
    }

    pub fn answers(&self) -> &AnswerSet {
        &self.answers
    }

    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    /// Bills answered for the first time plus bills skipped.
    pub fn question_count(&self) -> usize {
        self.question_count
    }

    pub fn user_vector(&self) -> &[f64] {
        &self.estimate.user_vector
    }

    pub fn uncertainty(&self) -> &[f64] {
        &self.estimate.uncertainty
    }

    pub fn estimate(&self) -> &Estimate {
        &self.estimate
    }

    pub fn current_question(&self) -> Option<&QuestionProposal> {
        self.current.as_ref()
    }

    pub fn top_matches(&self) -> &[MemberMatch] {
        &self.top_matches
    }

    pub fn completion_reason(&self) -> Option<CompletionReason> {
        self.completion
    }

    pub fn is_skipped(&self, bill_id: &str) -> bool {
        self.skipped.contains(bill_id)
    }

    /// Full ranking of every member against the current estimate.
    pub fn full_ranking(&self) -> Vec<MemberMatch> {
        rank(&self.estimate.user_vector, self.space.members(), None)
    }

    /// The `k` best matches against the current estimate.
    pub fn preview(&self, k: usize) -> Vec<MemberMatch> {
        rank(&self.estimate.user_vector, self.space.members(), Some(k))
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// `Created → Questioning`, proposing the first question.
    pub fn start(&mut self) -> Result<StepOutcome, ValidationError> {
        self.require_state("start", SessionState::Created)?;

        let span = crate::pm_span!("session_start", space_id = %self.space.space_id());
        let _guard = span.enter();

        self.state = SessionState::Questioning;
        self.top_matches = self.preview(self.config.top_k);
        self.advance();
        tracing::info!(
            dimensions = self.dimensions(),
            bills = self.space.bill_count(),
            members = self.space.member_count(),
            "Session started"
        );
        Ok(self.outcome())
    }

    /// Record (or replace) an answer, then re-estimate, re-rank and re-select.
    pub fn answer(&mut self, bill_id: &str, score: Score) -> Result<StepOutcome, ValidationError> {
        self.require_state("answer", SessionState::Questioning)?;
        self.require_bill("answer", bill_id)?;

        let span = crate::pm_span!(
            "session_answer",
            space_id = %self.space.space_id(),
            bill_id = %bill_id
        );
        let _guard = span.enter();

        let was_skipped = self.skipped.remove(bill_id);
        let previous = self.answers.upsert(UserAnswer::new(bill_id, score));
        if previous.is_none() && !was_skipped {
            self.question_count += 1;
        }

        let space = &self.space;
        self.estimate = estimate(
            &self.answers,
            |id| space.loading(id),
            space.dimensions(),
            &self.params,
        );
        self.top_matches = self.preview(self.config.top_k);
        self.advance();

        tracing::debug!(
            score = score.name(),
            replaced = previous.is_some(),
            question_count = self.question_count,
            max_uncertainty = self.estimate.max_uncertainty(),
            "Answer recorded"
        );
        Ok(self.outcome())
    }

    /// Pass on a bill without scoring it. Only the selector re-runs.
    pub fn skip(&mut self, bill_id: &str) -> Result<StepOutcome, ValidationError> {
        self.require_state("skip", SessionState::Questioning)?;
        self.require_bill("skip", bill_id)?;
        if self.answers.contains(bill_id) {
            return Err(self.rejected("skip", ValidationError::AlreadyAnswered(bill_id.to_string())));
        }

        let span = crate::pm_span!(
            "session_skip",
            space_id = %self.space.space_id(),
            bill_id = %bill_id
        );
        let _guard = span.enter();

        if self.skipped.insert(bill_id.to_string()) {
            self.question_count += 1;
        }
        self.advance();

        tracing::debug!(question_count = self.question_count, "Bill skipped");
        Ok(self.outcome())
    }

    /// Stop questioning now.
    ///
    /// Calling it again while awaiting importance returns the same ranking.
    pub fn finish(&mut self) -> Result<FinishOutcome, ValidationError> {
        match self.state {
            SessionState::Questioning => {
                let required = self.config.min_answers_before_finish;
                if self.answers.len() < required {
                    return Err(self.rejected(
                        "finish",
                        ValidationError::BelowMinimumAnswers {
                            required,
                            answered: self.answers.len(),
                        },
                    ));
                }
                self.stop(CompletionReason::EarlyFinish);
            }
            SessionState::AwaitingImportance => {}
            other => {
                return Err(self.rejected(
                    "finish",
                    ValidationError::InvalidTransition {
                        operation: "finish",
                        state: other.name(),
                    },
                ));
            }
        }

        Ok(FinishOutcome {
            matches: self.full_ranking(),
            user_vector: self.estimate.user_vector.clone(),
            completion: self.completion.unwrap_or(CompletionReason::EarlyFinish),
        })
    }

    /// `AwaitingImportance → Completed`, producing the immutable result.
    ///
    /// `None` uses the configured default importance.
    pub fn complete(&mut self, importance: Option<Importance>) -> Result<ClusterResult, ValidationError> {
        self.require_state("complete", SessionState::AwaitingImportance)?;

        let importance = importance.unwrap_or_else(|| {
            Importance::new(self.config.default_importance).unwrap_or_default()
        });
        self.state = SessionState::Completed;

        tracing::info!(
            space_id = %self.space.space_id(),
            answered = self.answers.len(),
            importance = importance.get(),
            "Session completed"
        );

        Ok(ClusterResult {
            space_id: self.space.space_id().to_string(),
            matches: self.full_ranking(),
            answered_count: self.answers.len(),
            importance,
            user_vector: self.estimate.user_vector.clone(),
            answers: self.answers.as_slice().to_vec(),
        })
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn require_state(&self, operation: &'static str, expected: SessionState) -> Result<(), ValidationError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.rejected(
                operation,
                ValidationError::InvalidTransition {
                    operation,
                    state: self.state.name(),
                },
            ))
        }
    }

    fn require_bill(&self, operation: &'static str, bill_id: &str) -> Result<(), ValidationError> {
        if self.space.contains_bill(bill_id) {
            Ok(())
        } else {
            Err(self.rejected(
                operation,
                ValidationError::UnknownBill {
                    space_id: self.space.space_id().to_string(),
                    bill_id: bill_id.to_string(),
                },
            ))
        }
    }

    fn rejected(&self, operation: &'static str, err: ValidationError) -> ValidationError {
        tracing::warn!(
            space_id = %self.space.space_id(),
            state = %self.state,
            operation,
            error = %err,
            "Session operation rejected"
        );
        err
    }

    /// Check the stop conditions, otherwise propose the next bill.
    fn advance(&mut self) {
        if self.question_count >= self.config.max_questions {
            self.stop(CompletionReason::QuestionLimit);
            return;
        }
        let threshold = self.config.uncertainty_threshold;
        if self.estimate.uncertainty.iter().all(|&u| u < threshold) {
            self.stop(CompletionReason::UncertaintyConverged);
            return;
        }
        let answers = &self.answers;
        let skipped = &self.skipped;
        self.current = select_next(&self.space, &self.estimate.uncertainty, |id| {
            answers.contains(id) || skipped.contains(id)
        });
        if self.current.is_none() {
            self.stop(CompletionReason::BillsExhausted);
        }
    }

    fn stop(&mut self, reason: CompletionReason) {
        self.state = SessionState::AwaitingImportance;
        self.current = None;
        self.completion = Some(reason);
        tracing::info!(
            space_id = %self.space.space_id(),
            question_count = self.question_count,
            reason = %reason,
            "Questioning stopped"
        );
    }

    fn outcome(&self) -> StepOutcome {
        StepOutcome {
            next_question: self.current.clone(),
            user_vector: self.estimate.user_vector.clone(),
            uncertainty: self.estimate.uncertainty.clone(),
            top_matches: self.top_matches.clone(),
            answered_count: self.answers.len(),
            question_count: self.question_count,
            is_complete: self.state != SessionState::Questioning,
            completion: self.completion,
        }
    }
}
