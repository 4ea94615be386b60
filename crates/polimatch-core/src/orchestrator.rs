//! Multi-space runs with server-held state.
//!
//! A run walks an ordered list of spaces. For each one it drives a
//! [`Session`] to completion, records the rated [`ClusterResult`], then moves
//! on; after the last space it aggregates a global ranking.
//!
//! All sequencing state (current index, active session, recorded results)
//! lives here. Callers hold only a [`RunId`] and the latest
//! [`ProgressToken`]:
//!
//! ```text
//! token_n = hex(sha256(run_id ‖ n ‖ nonce_n))
//! ```
//!
//! Every accepted call rotates the token; a rejected call leaves both the run
//! and its token unchanged. Presenting anything but the current token fails
//! with `StaleProgressToken`, so a stage cannot be replayed or skipped.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::aggregation::{ClusterResult, GlobalMemberScore, Importance, aggregate};
use crate::answers::Score;
use crate::config::EngineConfig;
use crate::error::{Error, Result, ValidationError};
use crate::latent_space::{LatentSpace, LatentSpaceProvider, SpaceId};
use crate::ranker::MemberMatch;
use crate::service::{Question, describe_question};
use crate::session::{CompletionReason, Session, SessionState};

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque run identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::rng().random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Single-use capability for the next call on a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressToken(String);

impl ProgressToken {
    fn derive(run_id: &RunId, stage: u64) -> Self {
        let nonce: [u8; 16] = rand::rng().random();
        let mut hasher = Sha256::new();
        hasher.update(run_id.as_str().as_bytes());
        hasher.update(stage.to_le_bytes());
        hasher.update(nonce);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProgressToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// =============================================================================
// Steps
// =============================================================================

/// Where the run stands within its current space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub space_id: SpaceId,
    /// Zero-based position of the space in the run.
    pub space_index: usize,
    pub space_count: usize,
    pub question_count: usize,
    pub answered_count: usize,
}

/// Final output of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub results: Vec<ClusterResult>,
    pub skipped_spaces: Vec<SpaceId>,
    pub global: Vec<GlobalMemberScore>,
}

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum RunStep {
    /// Answer or skip `question`.
    Question {
        progress: RunProgress,
        question: Question,
        user_vector: Vec<f64>,
        uncertainty: Vec<f64>,
        top_matches: Vec<MemberMatch>,
    },
    /// Questioning stopped; rate the space.
    AwaitingImportance {
        progress: RunProgress,
        reason: CompletionReason,
        matches: Vec<MemberMatch>,
    },
    /// Every space done.
    Finished(RunSummary),
}

impl RunStep {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// A step plus the token for the following call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub run_id: RunId,
    pub token: ProgressToken,
    pub step: RunStep,
}

// =============================================================================
// Run state
// =============================================================================

struct Run {
    spaces: Vec<Arc<LatentSpace>>,
    index: usize,
    session: Option<Session>,
    results: Vec<ClusterResult>,
    skipped_spaces: Vec<SpaceId>,
    stage: u64,
    token: ProgressToken,
}

impl Run {
    fn is_finished(&self) -> bool {
        self.session.is_none()
    }

    fn progress(&self, session: &Session) -> RunProgress {
        RunProgress {
            space_id: session.space_id().to_string(),
            space_index: self.index,
            space_count: self.spaces.len(),
            question_count: session.question_count(),
            answered_count: session.answered_count(),
        }
    }

    /// Open the session for `self.index`, or `None` past the last space.
    fn open_current(&mut self, config: &EngineConfig) -> Result<()> {
        self.session = match self.spaces.get(self.index) {
            Some(space) => {
                let mut session = Session::new(Arc::clone(space), space.dimensions(), config)?;
                session.start()?;
                Some(session)
            }
            None => None,
        };
        Ok(())
    }

    fn summary(&self, run_id: &RunId) -> RunSummary {
        RunSummary {
            run_id: run_id.clone(),
            results: self.results.clone(),
            skipped_spaces: self.skipped_spaces.clone(),
            global: aggregate(&self.results),
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Owns every in-flight run.
pub struct Orchestrator<P> {
    provider: P,
    config: EngineConfig,
    runs: HashMap<RunId, Run>,
}

impl<P: LatentSpaceProvider> Orchestrator<P> {
    pub fn new(provider: P, config: EngineConfig) -> Self {
        Self {
            provider,
            config,
            runs: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Start a run over `space_ids`, in order.
    ///
    /// Every space is resolved up front, so an unusable space fails here
    /// rather than halfway through.
    pub fn begin(&mut self, space_ids: &[SpaceId]) -> Result<RunResponse> {
        if space_ids.is_empty() {
            return Err(ValidationError::EmptyRun.into());
        }
        let spaces = space_ids
            .iter()
            .map(|id| self.provider.space(id))
            .collect::<Result<Vec<_>>>()?;

        let run_id = RunId::generate();
        let mut run = Run {
            spaces,
            index: 0,
            session: None,
            results: Vec::new(),
            skipped_spaces: Vec::new(),
            stage: 0,
            token: ProgressToken::derive(&run_id, 0),
        };
        run.open_current(&self.config)?;

        tracing::info!(run_id = %run_id, spaces = space_ids.len(), "Run started");
        let step = self.step_for(&run_id, &run)?;
        let token = run.token.clone();
        self.runs.insert(run_id.clone(), run);
        Ok(RunResponse {
            run_id,
            token,
            step,
        })
    }

    pub fn answer(
        &mut self,
        run_id: &RunId,
        token: &ProgressToken,
        bill_id: &str,
        score: i64,
    ) -> Result<RunResponse> {
        let score = Score::try_from(score)?;
        let span = crate::pm_span!("run_answer", run_id = %run_id, bill_id = %bill_id);
        let _guard = span.enter();

        let session = self.active_session(run_id, token, "answer")?;
        session.answer(bill_id, score)?;
        self.accept(run_id)
    }

    pub fn skip(&mut self, run_id: &RunId, token: &ProgressToken, bill_id: &str) -> Result<RunResponse> {
        let span = crate::pm_span!("run_skip", run_id = %run_id, bill_id = %bill_id);
        let _guard = span.enter();

        let session = self.active_session(run_id, token, "skip")?;
        session.skip(bill_id)?;
        self.accept(run_id)
    }

    /// End questioning in the current space early.
    pub fn finish(&mut self, run_id: &RunId, token: &ProgressToken) -> Result<RunResponse> {
        let session = self.active_session(run_id, token, "finish")?;
        session.finish()?;
        self.accept(run_id)
    }

    /// Rate the current space and move to the next one (or finish the run).
    pub fn rate_and_continue(
        &mut self,
        run_id: &RunId,
        token: &ProgressToken,
        importance: Option<i64>,
    ) -> Result<RunResponse> {
        let importance = importance.map(Importance::try_from).transpose()?;
        let span = crate::pm_span!("run_rate", run_id = %run_id);
        let _guard = span.enter();

        let session = self.active_session(run_id, token, "rate")?;
        let result = session.complete(importance)?;

        let config = self.config.clone();
        let run = self.run_mut(run_id)?;
        tracing::info!(
            space_id = %result.space_id,
            importance = result.importance.get(),
            "Space rated"
        );
        run.results.push(result);
        run.index += 1;
        run.open_current(&config)?;
        self.accept(run_id)
    }

    /// Leave the current space without a result.
    pub fn skip_space(&mut self, run_id: &RunId, token: &ProgressToken) -> Result<RunResponse> {
        self.active_session(run_id, token, "skip_space")?;

        let config = self.config.clone();
        let run = self.run_mut(run_id)?;
        if let Some(session) = run.session.take() {
            tracing::info!(space_id = %session.space_id(), "Space skipped");
            run.skipped_spaces.push(session.space_id().to_string());
        }
        run.index += 1;
        run.open_current(&config)?;
        self.accept(run_id)
    }

    /// Summary of a finished run.
    pub fn summary(&self, run_id: &RunId) -> Result<RunSummary> {
        let run = self
            .runs
            .get(run_id)
            .ok_or_else(|| Error::not_found("run", run_id.as_str()))?;
        if !run.is_finished() {
            return Err(ValidationError::InvalidTransition {
                operation: "summarize",
                state: "in_progress",
            }
            .into());
        }
        Ok(run.summary(run_id))
    }

    /// Forget a run. Returns whether it existed.
    pub fn abandon(&mut self, run_id: &RunId) -> bool {
        self.runs.remove(run_id).is_some()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn run_mut(&mut self, run_id: &RunId) -> Result<&mut Run> {
        self.runs
            .get_mut(run_id)
            .ok_or_else(|| Error::not_found("run", run_id.as_str()))
    }

    /// Resolve the run, check the token, and return the active session.
    fn active_session(
        &mut self,
        run_id: &RunId,
        token: &ProgressToken,
        operation: &'static str,
    ) -> Result<&mut Session> {
        let run = self.run_mut(run_id)?;
        if run.token != *token {
            tracing::warn!(run_id = %run_id, operation, "Stale progress token");
            return Err(ValidationError::StaleProgressToken.into());
        }
        run.session.as_mut().ok_or(Error::Validation(ValidationError::InvalidTransition {
            operation,
            state: "finished",
        }))
    }

    /// Rotate the token after a successful mutation and describe the next step.
    fn accept(&mut self, run_id: &RunId) -> Result<RunResponse> {
        let run = self.run_mut(run_id)?;
        run.stage += 1;
        run.token = ProgressToken::derive(run_id, run.stage);
        let token = run.token.clone();

        let run = self
            .runs
            .get(run_id)
            .ok_or_else(|| Error::not_found("run", run_id.as_str()))?;
        let step = self.step_for(run_id, run)?;
        if step.is_finished() {
            tracing::info!(run_id = %run_id, "Run finished");
        }
        Ok(RunResponse {
            run_id: run_id.clone(),
            token,
            step,
        })
    }

    fn step_for(&self, run_id: &RunId, run: &Run) -> Result<RunStep> {
        let Some(session) = run.session.as_ref() else {
            return Ok(RunStep::Finished(run.summary(run_id)));
        };
        let progress = run.progress(session);
        match (session.state(), session.current_question()) {
            (SessionState::Questioning, Some(proposal)) => {
                let question = describe_question(&self.provider, session, proposal)
                    .ok_or_else(|| Error::not_found("bill", proposal.bill_id.as_str()))?;
                Ok(RunStep::Question {
                    progress,
                    question,
                    user_vector: session.user_vector().to_vec(),
                    uncertainty: session.uncertainty().to_vec(),
                    top_matches: session.top_matches().to_vec(),
                })
            }
            _ => Ok(RunStep::AwaitingImportance {
                progress,
                reason: session
                    .completion_reason()
                    .unwrap_or(CompletionReason::EarlyFinish),
                matches: session.preview(self.config.preview_k),
            }),
        }
    }
}

impl<P> std::fmt::Debug for Orchestrator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("runs", &self.runs.len())
            .finish()
    }
}

// =============================================================================
// Driving a run
// =============================================================================

/// How a respondent reacts to one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Answer(Score),
    Skip,
    Finish,
}

/// Source of answers and ratings for [`run_all`].
pub trait Respondent {
    fn respond(&mut self, progress: &RunProgress, question: &Question) -> Result<Reply>;

    /// Importance for a finished space; `None` takes the default.
    fn rate(
        &mut self,
        progress: &RunProgress,
        reason: CompletionReason,
        matches: &[MemberMatch],
    ) -> Result<Option<Importance>>;
}

/// Drive a whole run to completion with `respondent`.
///
/// A `Finish` refused by the minimum-answer gate is treated as a skip of the
/// current question, so the run always makes progress.
pub fn run_all<P, R>(
    provider: P,
    space_ids: &[SpaceId],
    config: &EngineConfig,
    respondent: &mut R,
) -> Result<RunSummary>
where
    P: LatentSpaceProvider,
    R: Respondent + ?Sized,
{
    let mut orchestrator = Orchestrator::new(provider, config.clone());
    let mut response = orchestrator.begin(space_ids)?;
    let run_id = response.run_id.clone();

    loop {
        let token = response.token.clone();
        response = match &response.step {
            RunStep::Finished(summary) => return Ok(summary.clone()),
            RunStep::Question {
                progress, question, ..
            } => {
                let bill_id = question.bill.bill_id.as_str();
                match respondent.respond(progress, question)? {
                    Reply::Answer(score) => {
                        orchestrator.answer(&run_id, &token, bill_id, i64::from(score))?
                    }
                    Reply::Skip => orchestrator.skip(&run_id, &token, bill_id)?,
                    Reply::Finish => match orchestrator.finish(&run_id, &token) {
                        Err(Error::Validation(ValidationError::BelowMinimumAnswers { .. })) => {
                            orchestrator.skip(&run_id, &token, bill_id)?
                        }
                        other => other?,
                    },
                }
            }
            RunStep::AwaitingImportance {
                progress,
                reason,
                matches,
            } => {
                let importance = respondent.rate(progress, *reason, matches)?;
                orchestrator.rate_and_continue(
                    &run_id,
                    &token,
                    importance.map(|i| i64::from(i.get())),
                )?
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latent_space::InMemorySpaceProvider;

    fn provider() -> InMemorySpaceProvider {
        let mut provider = InMemorySpaceProvider::new();
        provider.insert(
            LatentSpace::new(
                "r:a",
                2,
                vec![
                    ("A1".to_string(), vec![1.0, 0.0]),
                    ("A2".to_string(), vec![0.0, 1.0]),
                ],
                vec![
                    ("x".to_string(), vec![1.0, 1.0]),
                    ("y".to_string(), vec![-1.0, -1.0]),
                ],
                vec![0.5, 0.5],
            )
            .unwrap(),
        );
        provider.insert(
            LatentSpace::new(
                "r:b",
                1,
                vec![("B1".to_string(), vec![1.0])],
                vec![("x".to_string(), vec![-1.0]), ("z".to_string(), vec![1.0])],
                vec![1.0],
            )
            .unwrap(),
        );
        provider
    }

    fn ids(list: &[&str]) -> Vec<SpaceId> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn question_bill(step: &RunStep) -> String {
        match step {
            RunStep::Question { question, .. } => question.bill.bill_id.clone(),
            other => panic!("expected question, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------------
    // Tokens
    // -------------------------------------------------------------------------

    #[test]
    fn tokens_are_sha256_hex_and_unique() {
        let run = RunId::generate();
        let a = ProgressToken::derive(&run, 1);
        let b = ProgressToken::derive(&run, 1);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn stale_token_is_rejected_without_mutation() {
        let mut orch = Orchestrator::new(provider(), EngineConfig::default());
        let first = orch.begin(&ids(&["r:a", "r:b"])).unwrap();
        let bill = question_bill(&first.step);

        let second = orch.answer(&first.run_id, &first.token, &bill, 1).unwrap();
        assert_ne!(second.token, first.token);

        // Replaying the old token fails.
        let err = orch.answer(&first.run_id, &first.token, &bill, -1).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::StaleProgressToken)));

        // A rejected call keeps the current token valid.
        let forged = ProgressToken::from("00");
        assert!(orch.finish(&first.run_id, &forged).is_err());
        assert!(orch.finish(&first.run_id, &second.token).is_ok());
    }

    #[test]
    fn rating_requires_awaiting_importance() {
        let mut orch = Orchestrator::new(provider(), EngineConfig::default());
        let first = orch.begin(&ids(&["r:a"])).unwrap();
        let err = orch
            .rate_and_continue(&first.run_id, &first.token, Some(4))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidTransition { .. })
        ));
        // Token still valid after the rejection.
        assert!(orch.finish(&first.run_id, &first.token).is_ok());
    }

    // -------------------------------------------------------------------------
    // Sequencing
    // -------------------------------------------------------------------------

    #[test]
    fn run_walks_spaces_and_aggregates() {
        let mut orch = Orchestrator::new(provider(), EngineConfig::default());
        let mut r = orch.begin(&ids(&["r:a", "r:b"])).unwrap();
        let run_id = r.run_id.clone();

        // Space a: agree with both bills, converges.
        for _ in 0..2 {
            let bill = question_bill(&r.step);
            r = orch.answer(&run_id, &r.token, &bill, 1).unwrap();
        }
        assert!(matches!(r.step, RunStep::AwaitingImportance { .. }));
        r = orch.rate_and_continue(&run_id, &r.token, Some(5)).unwrap();

        // Space b.
        match &r.step {
            RunStep::Question { progress, .. } => {
                assert_eq!(progress.space_id, "r:b");
                assert_eq!(progress.space_index, 1);
                assert_eq!(progress.space_count, 2);
            }
            other => panic!("expected question, got {other:?}"),
        }
        let bill = question_bill(&r.step);
        r = orch.answer(&run_id, &r.token, &bill, 1).unwrap();
        r = orch.rate_and_continue(&run_id, &r.token, Some(1)).unwrap();

        let RunStep::Finished(summary) = &r.step else {
            panic!("expected finished run");
        };
        assert_eq!(summary.results.len(), 2);
        let x = summary.global.iter().find(|g| g.member_id == "x").unwrap();
        assert!((x.global_score - (5.0 / 6.0 - 1.0 / 6.0)).abs() < 1e-9);
        assert_eq!(summary.global[0].member_id, "x");
        assert_eq!(orch.summary(&run_id).unwrap(), *summary);

        // Nothing more to do.
        let err = orch.finish(&run_id, &r.token).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidTransition { state: "finished", .. })
        ));
    }

    #[test]
    fn skip_space_contributes_nothing() {
        let mut orch = Orchestrator::new(provider(), EngineConfig::default());
        let r = orch.begin(&ids(&["r:a", "r:b"])).unwrap();
        let r = orch.skip_space(&r.run_id, &r.token).unwrap();
        let r = orch.skip_space(&r.run_id, &r.token).unwrap();
        let RunStep::Finished(summary) = r.step else {
            panic!("expected finished run");
        };
        assert!(summary.results.is_empty());
        assert_eq!(summary.skipped_spaces, ["r:a", "r:b"]);
        assert!(summary.global.is_empty());
    }

    #[test]
    fn begin_validates_spaces() {
        let mut orch = Orchestrator::new(provider(), EngineConfig::default());
        assert!(matches!(
            orch.begin(&[]),
            Err(Error::Validation(ValidationError::EmptyRun))
        ));
        assert!(matches!(
            orch.begin(&ids(&["r:a", "r:missing"])),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(orch.run_count(), 0);
    }

    #[test]
    fn summary_of_running_run_is_rejected() {
        let mut orch = Orchestrator::new(provider(), EngineConfig::default());
        let r = orch.begin(&ids(&["r:a"])).unwrap();
        assert!(orch.summary(&r.run_id).is_err());
        assert!(orch.abandon(&r.run_id));
        assert!(matches!(orch.summary(&r.run_id), Err(Error::NotFound { .. })));
    }

    // -------------------------------------------------------------------------
    // run_all
    // -------------------------------------------------------------------------

    struct AlwaysFinish {
        rated: usize,
    }

    impl Respondent for AlwaysFinish {
        fn respond(&mut self, _: &RunProgress, _: &Question) -> Result<Reply> {
            Ok(Reply::Finish)
        }

        fn rate(&mut self, _: &RunProgress, _: CompletionReason, _: &[MemberMatch]) -> Result<Option<Importance>> {
            self.rated += 1;
            Ok(None)
        }
    }

    #[test]
    fn gated_finish_falls_back_to_skip() {
        let config = EngineConfig {
            min_answers_before_finish: 1,
            ..EngineConfig::default()
        };
        let mut respondent = AlwaysFinish { rated: 0 };
        let summary = run_all(provider(), &ids(&["r:a", "r:b"]), &config, &mut respondent).unwrap();
        assert_eq!(respondent.rated, 2);
        assert_eq!(summary.results.len(), 2);
        assert!(summary.results.iter().all(|r| r.answered_count == 0));
        assert!(summary.results.iter().all(|r| r.importance == Importance::DEFAULT));
    }
}
