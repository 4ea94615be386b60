//! Error types shared by every polimatch-core operation.
//!
//! Each error can describe a [`Remediation`]: a one-line suggestion plus
//! optional commands and notes, printed by the CLI under the error itself.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// What the user can do about an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remediation {
    pub summary: String,
    pub hints: Vec<Hint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Hint {
    /// A command worth running, with a short label.
    Run { label: String, command: String },
    Note { text: String },
}

impl Remediation {
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            hints: Vec::new(),
        }
    }

    #[must_use]
    pub fn run(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.hints.push(Hint::Run {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    #[must_use]
    pub fn note(mut self, text: impl Into<String>) -> Self {
        self.hints.push(Hint::Note { text: text.into() });
        self
    }
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hint: {}", self.summary)?;
        for hint in &self.hints {
            match hint {
                Hint::Run { label, command } => write!(f, "\n  $ {command}  ({label})")?,
                Hint::Note { text } => write!(f, "\n  - {text}")?,
            }
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Unknown session, run, or space identifier
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Invalid caller input; nothing was mutated
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed latent space artifact (fatal, not retried)
    #[error("Latent space configuration error: {0}")]
    Configuration(#[from] SpaceError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact or stored payload that is not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the caller may retry the operation with corrected input.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Validation(_))
    }

    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::NotFound { kind, .. } => Some(
                Remediation::new(format!("The {kind} may have finished or never existed."))
                    .note("Start a new session; abandoned sessions are not recoverable."),
            ),
            Self::Validation(err) => Some(err.remediation()),
            Self::Configuration(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Storage(err) => Some(err.remediation()),
            Self::Io(_) => Some(Remediation::new(
                "Check that the artifact and database paths exist and are accessible.",
            )),
            Self::Json(_) => Some(
                Remediation::new("The artifact is not valid JSON.")
                    .run("Locate the problem", "python -m json.tool < artifact.json")
                    .note("Regenerate the artifact with the offline latent-space pipeline."),
            ),
        }
    }
}

/// Invalid input rejected at the session/orchestrator boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("score must be one of -1, 0, 1 (got {0})")]
    InvalidScore(i64),

    #[error("importance must be within 1..=5 (got {0})")]
    ImportanceOutOfRange(i64),

    #[error("dimension mismatch: space has {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("bill {bill_id} is not part of space {space_id}")]
    UnknownBill { space_id: String, bill_id: String },

    #[error("bill {0} has already been answered")]
    AlreadyAnswered(String),

    #[error("cannot {operation} while session is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: &'static str,
    },

    #[error("at least {required} answers are required before finishing (have {answered})")]
    BelowMinimumAnswers { required: usize, answered: usize },

    #[error("progress token is stale or was not issued for this run")]
    StaleProgressToken,

    #[error("a run needs at least one space")]
    EmptyRun,
}

impl ValidationError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::InvalidScore(_) => Remediation::new("Answer with -1 (disagree), 0 (abstain) or 1 (agree)."),
            Self::ImportanceOutOfRange(_) => {
                Remediation::new("Rate the topic from 1 (unimportant) to 5 (very important).")
                    .note("Omit the rating to use the default importance of 3.")
            }
            Self::DimensionMismatch { .. } => {
                Remediation::new("Start the session with the dimension count of the latent space.")
                    .run("Inspect space", "pm inspect <artifact>")
            }
            Self::UnknownBill { .. } => {
                Remediation::new("Only answer bills proposed by the session for this space.")
            }
            Self::AlreadyAnswered(_) => {
                Remediation::new("Re-answer the bill instead of skipping it, or skip a different bill.")
            }
            Self::InvalidTransition { .. } => Remediation::new(
                "Follow the session order: start, answer/skip, finish, then rate importance.",
            ),
            Self::BelowMinimumAnswers { .. } => Remediation::new(
                "Answer a few more questions before finishing early.",
            )
            .note("Lower engine.min_answers_before_finish in pm.toml."),
            Self::StaleProgressToken => Remediation::new(
                "Use the progress token returned by the most recent call for this run.",
            ),
            Self::EmptyRun => Remediation::new("Pass at least one space id when beginning a run.")
                .run("List spaces", "pm inspect <artifact>"),
        }
    }
}

/// Latent space shape/content errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpaceError {
    #[error("space {space_id} declares zero dimensions")]
    ZeroDimensions { space_id: String },

    #[error("space {space_id} has no member vectors")]
    NoMembers { space_id: String },

    #[error("space {space_id} has no bill loadings")]
    NoBills { space_id: String },

    #[error("space {space_id}: {kind} {id} has length {actual}, expected {expected}")]
    VectorLength {
        space_id: String,
        kind: &'static str,
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("space {space_id}: duplicate {kind} id {id}")]
    DuplicateId {
        space_id: String,
        kind: &'static str,
        id: String,
    },

    #[error("space {space_id}: {bill_ids} bill ids but {loadings} loading rows")]
    MisalignedLoadings {
        space_id: String,
        bill_ids: usize,
        loadings: usize,
    },

    #[error("space {space_id} contains a non-finite value")]
    NonFinite { space_id: String },
}

impl SpaceError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        Remediation::new("Regenerate the latent space artifact; the core never repairs it.")
            .run("Inspect space", "pm inspect <artifact>")
            .note("Exclude this space from the run.")
    }
}

/// Problems loading or checking `pm.toml`
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no config file at {0}")]
    Missing(String),

    #[error("cannot read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("invalid TOML: {0}")]
    Malformed(String),

    #[error("cannot encode config: {0}")]
    Encode(String),

    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Missing(_) => Remediation::new("Pass --config an existing file or unset PM_CONFIG.")
                .note("Without a config file the built-in defaults apply."),
            Self::Unreadable { .. } => Remediation::new("Make the config file readable by the current user."),
            Self::Malformed(_) | Self::Encode(_) => Remediation::new("Fix the TOML syntax in pm.toml.")
                .run("Print defaults", "pm config"),
            Self::Invalid(_) => Remediation::new("Correct the reported value in pm.toml."),
        }
    }
}

/// Result store failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Database(String),

    #[error("stored run is unreadable: {0}")]
    Corrupt(String),
}

impl StorageError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Database(_) => Remediation::new("Check that the --db path is writable.")
                .note("A new file gets the schema on first open."),
            Self::Corrupt(_) => Remediation::new("Record the run again with `pm quiz`."),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err.to_string()))
    }
}

/// `Error: <message>` followed by a blank line and the hint, if any.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    match error.remediation() {
        Some(hint) => format!("Error: {error}\n\n{hint}"),
        None => format!("Error: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_available_for_error_variants() {
        let json_err = serde_json::from_str::<serde_json::Value>("").unwrap_err();
        let errors = vec![
            Error::not_found("session", "abc"),
            Error::Validation(ValidationError::InvalidScore(7)),
            Error::Validation(ValidationError::ImportanceOutOfRange(9)),
            Error::Validation(ValidationError::DimensionMismatch {
                expected: 3,
                actual: 2,
            }),
            Error::Validation(ValidationError::StaleProgressToken),
            Error::Configuration(SpaceError::NoMembers {
                space_id: "s".to_string(),
            }),
            Error::Config(ConfigError::Malformed("bad".to_string())),
            Error::Storage(StorageError::Database("locked".to_string())),
            Error::Storage(StorageError::Corrupt("row 1".to_string())),
            Error::Io(std::io::Error::other("io")),
            Error::Json(json_err),
        ];

        for error in &errors {
            let hint = error.remediation();
            assert!(
                hint.is_some_and(|h| !h.summary.is_empty()),
                "no usable hint for {error:?}"
            );
        }
    }

    #[test]
    fn bare_summary_renders_on_one_line() {
        assert_eq!(Remediation::new("Do the thing").to_string(), "hint: Do the thing");
    }

    #[test]
    fn hints_render_in_insertion_order() {
        let text = Remediation::new("Fix")
            .note("Try again")
            .run("Inspect", "pm inspect a.json")
            .to_string();
        assert_eq!(
            text,
            "hint: Fix\n  - Try again\n  $ pm inspect a.json  (Inspect)"
        );
    }

    #[test]
    fn hints_serialize_with_a_kind_tag() {
        let json = serde_json::to_value(Remediation::new("x").run("l", "c")).unwrap();
        assert_eq!(json["hints"][0]["kind"], "run");
        assert_eq!(json["hints"][0]["command"], "c");
    }

    #[test]
    fn caller_errors_are_classified() {
        assert!(Error::not_found("session", "x").is_caller_error());
        assert!(Error::Validation(ValidationError::EmptyRun).is_caller_error());
        assert!(
            !Error::Configuration(SpaceError::ZeroDimensions {
                space_id: "s".to_string()
            })
            .is_caller_error()
        );
    }

    #[test]
    fn error_display_includes_context() {
        let err = Error::not_found("session", "deadbeef");
        assert_eq!(err.to_string(), "session not found: deadbeef");

        let err = Error::Validation(ValidationError::BelowMinimumAnswers {
            required: 5,
            answered: 2,
        });
        assert!(err.to_string().contains("at least 5 answers"));
    }

    #[test]
    fn from_rusqlite_error_maps_to_storage() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::Storage(StorageError::Database(_))));
    }

    #[test]
    fn formatted_error_has_remediation() {
        let err = Error::Validation(ValidationError::InvalidScore(3));
        let text = format_error_with_remediation(&err);
        assert!(text.starts_with("Error: Validation error"));
        assert!(text.contains("\n\nhint: Answer with -1"), "{text}");
    }
}
