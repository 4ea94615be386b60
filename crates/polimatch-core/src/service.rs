//! Session registry addressed by opaque ids.
//!
//! This is the request/response boundary: raw scores and importances arrive
//! here as integers and are validated before any session sees them. Unknown
//! ids surface as [`Error::NotFound`].
//!
//! Operations on one id must be serialized by the caller; `&mut self` makes
//! that explicit for in-process use.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::aggregation::{ClusterResult, Importance};
use crate::answers::Score;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::latent_space::{BillInfo, LatentSpaceProvider, space_key};
use crate::ranker::MemberMatch;
use crate::selector::QuestionProposal;
use crate::session::{Session, StepOutcome};

/// Opaque session identifier (128 random bits, hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::rng().random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// =============================================================================
// Responses
// =============================================================================

/// A proposed question joined with the bill's descriptive fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub bill: BillInfo,
    /// 1-based, for display.
    pub target_dimension: usize,
    pub rationale: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: SessionId,
    pub next_question: Option<Question>,
    pub user_vector: Vec<f64>,
    pub uncertainty: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answered_count: usize,
    pub next_question: Option<Question>,
    pub user_vector: Vec<f64>,
    pub uncertainty: Vec<f64>,
    pub top_matches: Vec<MemberMatch>,
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipResponse {
    pub next_question: Option<Question>,
    pub user_vector: Vec<f64>,
    pub uncertainty: Vec<f64>,
    pub top_matches: Vec<MemberMatch>,
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishResponse {
    pub matches: Vec<MemberMatch>,
    pub user_vector: Vec<f64>,
}

/// Join a proposal with bill metadata from `provider`.
pub fn describe_question<P: LatentSpaceProvider + ?Sized>(
    provider: &P,
    session: &Session,
    proposal: &QuestionProposal,
) -> Option<Question> {
    let metadata = provider.bill_metadata(&proposal.bill_id);
    let bill = session.space().bill_info(&proposal.bill_id, metadata.as_ref())?;
    Some(Question {
        bill,
        target_dimension: proposal.target_dimension + 1,
        rationale: proposal.rationale.clone(),
        score: proposal.score,
    })
}

// =============================================================================
// Service
// =============================================================================

/// Owns live sessions keyed by [`SessionId`].
pub struct QuizService<P> {
    provider: P,
    config: EngineConfig,
    sessions: HashMap<SessionId, Session>,
}

impl<P: LatentSpaceProvider> QuizService<P> {
    pub fn new(provider: P, config: EngineConfig) -> Self {
        Self {
            provider,
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Open a session on `space_id` (or `space_id:label` when a label is given).
    pub fn start(
        &mut self,
        space_id: &str,
        cluster_label: Option<&str>,
        dimensions: usize,
    ) -> Result<StartResponse> {
        let space_id = match cluster_label {
            Some(label) => space_key(&space_id, label),
            None => space_id.to_string(),
        };
        let space = self.provider.space(&space_id)?;
        let mut session = Session::new(space, dimensions, &self.config)?;
        let outcome = session.start()?;

        let session_id = SessionId::generate();
        tracing::info!(session_id = %session_id, space_id = %space_id, "Quiz session opened");

        let next_question = self.question_for(&session, &outcome);
        self.sessions.insert(session_id.clone(), session);
        Ok(StartResponse {
            session_id,
            next_question,
            user_vector: outcome.user_vector,
            uncertainty: outcome.uncertainty,
        })
    }

    pub fn answer(&mut self, id: &SessionId, bill_id: &str, score: i64) -> Result<AnswerResponse> {
        let score = Score::try_from(score)?;
        let span = crate::pm_span!("service_answer", session_id = %id);
        let _guard = span.enter();

        let session = self.session_mut(id)?;
        let outcome = session.answer(bill_id, score)?;
        let next_question = self.question_for_id(id, &outcome);
        Ok(AnswerResponse {
            answered_count: outcome.answered_count,
            next_question,
            user_vector: outcome.user_vector,
            uncertainty: outcome.uncertainty,
            top_matches: outcome.top_matches,
            is_complete: outcome.is_complete,
        })
    }

    pub fn skip(&mut self, id: &SessionId, bill_id: &str) -> Result<SkipResponse> {
        let span = crate::pm_span!("service_skip", session_id = %id);
        let _guard = span.enter();

        let session = self.session_mut(id)?;
        let outcome = session.skip(bill_id)?;
        let next_question = self.question_for_id(id, &outcome);
        Ok(SkipResponse {
            next_question,
            user_vector: outcome.user_vector,
            uncertainty: outcome.uncertainty,
            top_matches: outcome.top_matches,
            is_complete: outcome.is_complete,
        })
    }

    /// Stop asking regardless of remaining bills (subject to the minimum-answer gate).
    pub fn finish(&mut self, id: &SessionId) -> Result<FinishResponse> {
        let finished = self.session_mut(id)?.finish()?;
        Ok(FinishResponse {
            matches: finished.matches,
            user_vector: finished.user_vector,
        })
    }

    /// Rate the space and retire the session.
    pub fn complete(&mut self, id: &SessionId, importance: Option<i64>) -> Result<ClusterResult> {
        let importance = importance.map(Importance::try_from).transpose()?;
        let result = self.session_mut(id)?.complete(importance)?;
        self.sessions.remove(id);
        tracing::info!(session_id = %id, "Quiz session retired");
        Ok(result)
    }

    /// Drop a session without producing a result. Returns whether it existed.
    pub fn abandon(&mut self, id: &SessionId) -> bool {
        let existed = self.sessions.remove(id).is_some();
        if existed {
            tracing::debug!(session_id = %id, "Quiz session abandoned");
        }
        existed
    }

    fn session_mut(&mut self, id: &SessionId) -> Result<&mut Session> {
        self.sessions.get_mut(id).ok_or_else(|| {
            tracing::warn!(session_id = %id, "Unknown session");
            Error::not_found("session", id.as_str())
        })
    }

    fn question_for(&self, session: &Session, outcome: &StepOutcome) -> Option<Question> {
        let proposal = outcome.next_question.as_ref()?;
        describe_question(&self.provider, session, proposal)
    }

    fn question_for_id(&self, id: &SessionId, outcome: &StepOutcome) -> Option<Question> {
        let session = self.sessions.get(id)?;
        self.question_for(session, outcome)
    }
}

impl<P> std::fmt::Debug for QuizService<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuizService")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
