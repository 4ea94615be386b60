//! Respondent answers: scores and the per-session answer set.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::latent_space::BillId;

/// Agree / abstain / disagree on one bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Score {
    Disagree,
    Abstain,
    Agree,
}

impl Score {
    #[must_use]
    pub fn value(self) -> f64 {
        match self {
            Self::Disagree => -1.0,
            Self::Abstain => 0.0,
            Self::Agree => 1.0,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Disagree => "disagree",
            Self::Abstain => "abstain",
            Self::Agree => "agree",
        }
    }
}

impl TryFrom<i64> for Score {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Disagree),
            0 => Ok(Self::Abstain),
            1 => Ok(Self::Agree),
            other => Err(ValidationError::InvalidScore(other)),
        }
    }
}

impl From<Score> for i64 {
    fn from(score: Score) -> Self {
        match score {
            Score::Disagree => -1,
            Score::Abstain => 0,
            Score::Agree => 1,
        }
    }
}

/// One recorded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAnswer {
    pub bill_id: BillId,
    pub score: Score,
}

impl UserAnswer {
    pub fn new(bill_id: impl Into<BillId>, score: Score) -> Self {
        Self {
            bill_id: bill_id.into(),
            score,
        }
    }
}

/// Answers keyed by bill, in first-answered order.
///
/// Re-answering a bill replaces its score in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSet {
    answers: Vec<UserAnswer>,
}

impl AnswerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the previous score if the bill was answered.
    pub fn upsert(&mut self, answer: UserAnswer) -> Option<Score> {
        if let Some(existing) = self.answers.iter_mut().find(|a| a.bill_id == answer.bill_id) {
            let previous = existing.score;
            existing.score = answer.score;
            return Some(previous);
        }
        self.answers.push(answer);
        None
    }

    pub fn get(&self, bill_id: &str) -> Option<Score> {
        self.answers
            .iter()
            .find(|a| a.bill_id == bill_id)
            .map(|a| a.score)
    }

    pub fn contains(&self, bill_id: &str) -> bool {
        self.get(bill_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UserAnswer> {
        self.answers.iter()
    }

    pub fn as_slice(&self) -> &[UserAnswer] {
        &self.answers
    }
}

impl<'a> IntoIterator for &'a AnswerSet {
    type Item = &'a UserAnswer;
    type IntoIter = std::slice::Iter<'a, UserAnswer>;

    fn into_iter(self) -> Self::IntoIter {
        self.answers.iter()
    }
}
