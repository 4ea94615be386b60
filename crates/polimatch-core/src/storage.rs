//! SQLite persistence for completed runs.
//!
//! One row per completed [`ClusterResult`], keyed by `(run_id, space_id)`.
//! Vectors, match lists and answers are stored as JSON text. Global rankings
//! are never stored: [`ResultStore::global_scores`] re-aggregates on read.
//!
//! Answers are also written individually with upsert semantics keyed by
//! `(scope, bill_id)`, so re-submitting an answer is idempotent.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};

use crate::aggregation::{ClusterResult, GlobalMemberScore, Importance, aggregate};
use crate::answers::{Score, UserAnswer};
use crate::error::{Result, StorageError};
use crate::orchestrator::RunSummary;

/// Schema applied on open. Idempotent.
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS answers (
    scope       TEXT NOT NULL,
    bill_id     TEXT NOT NULL,
    score       INTEGER NOT NULL CHECK (score IN (-1, 0, 1)),
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (scope, bill_id)
);

CREATE TABLE IF NOT EXISTS cluster_results (
    run_id          TEXT NOT NULL,
    space_id        TEXT NOT NULL,
    position        INTEGER NOT NULL,
    importance      INTEGER NOT NULL CHECK (importance BETWEEN 1 AND 5),
    answered_count  INTEGER NOT NULL,
    user_vector     TEXT NOT NULL,
    matches         TEXT NOT NULL,
    answers         TEXT NOT NULL,
    recorded_at     TEXT NOT NULL,
    PRIMARY KEY (run_id, space_id)
);

CREATE INDEX IF NOT EXISTS idx_cluster_results_run
    ON cluster_results(run_id, position);
";

const UPSERT_ANSWER_SQL: &str = "INSERT INTO answers (scope, bill_id, score, updated_at)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(scope, bill_id) DO UPDATE SET
         score = excluded.score,
         updated_at = excluded.updated_at";

/// Stored run listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_id: String,
    pub spaces: usize,
    pub recorded_at: String,
}

/// Answer scope for one space of one run.
pub fn answer_scope(run_id: &str, space_id: &str) -> String {
    format!("{run_id}/{space_id}")
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn insert_cluster_result(tx: &Transaction<'_>, run_id: &str, result: &ClusterResult) -> Result<()> {
    let position: i64 = tx
        .query_row(
            "SELECT position FROM cluster_results WHERE run_id = ?1 AND space_id = ?2",
            params![run_id, result.space_id],
            |row| row.get(0),
        )
        .optional()?
        .map_or_else(
            || {
                tx.query_row(
                    "SELECT COUNT(*) FROM cluster_results WHERE run_id = ?1",
                    [run_id],
                    |row| row.get(0),
                )
            },
            Ok,
        )?;

    tx.execute(
        "INSERT INTO cluster_results
             (run_id, space_id, position, importance, answered_count,
              user_vector, matches, answers, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(run_id, space_id) DO UPDATE SET
             importance = excluded.importance,
             answered_count = excluded.answered_count,
             user_vector = excluded.user_vector,
             matches = excluded.matches,
             answers = excluded.answers,
             recorded_at = excluded.recorded_at",
        params![
            run_id,
            result.space_id,
            position,
            i64::from(result.importance.get()),
            result.answered_count as i64,
            serde_json::to_string(&result.user_vector)?,
            serde_json::to_string(&result.matches)?,
            serde_json::to_string(&result.answers)?,
            now_rfc3339(),
        ],
    )?;

    let scope = answer_scope(run_id, &result.space_id);
    for answer in &result.answers {
        tx.execute(
            UPSERT_ANSWER_SQL,
            params![scope, answer.bill_id, i64::from(answer.score), now_rfc3339()],
        )?;
    }

    tracing::debug!(
        run_id,
        space_id = %result.space_id,
        position,
        "Cluster result recorded"
    );
    Ok(())
}

/// Completed-run storage over one SQLite connection.
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    /// Open (creating if needed) a database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        let store = Self { conn };
        store.initialize_schema()?;
        tracing::debug!(path = %path.display(), "Result store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Insert or replace one answer.
    pub fn upsert_answer(&self, scope: &str, bill_id: &str, score: Score) -> Result<()> {
        self.conn.execute(
            UPSERT_ANSWER_SQL,
            params![scope, bill_id, i64::from(score), now_rfc3339()],
        )?;
        Ok(())
    }

    /// Answers recorded under `scope`, by bill id.
    pub fn answers(&self, scope: &str) -> Result<Vec<UserAnswer>> {
        let mut stmt = self
            .conn
            .prepare("SELECT bill_id, score FROM answers WHERE scope = ?1 ORDER BY bill_id")?;
        let rows: Vec<(String, i64)> = stmt
            .query_map([scope], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(|(bill_id, score)| -> Result<UserAnswer> {
                let score = Score::try_from(score).map_err(|e| {
                    StorageError::Corrupt(format!("answer {scope}/{bill_id}: {e}"))
                })?;
                Ok(UserAnswer::new(bill_id, score))
            })
            .collect()
    }

    /// Store one completed space of a run, replacing any earlier row for it.
    pub fn record_cluster_result(&mut self, run_id: &str, result: &ClusterResult) -> Result<()> {
        let tx = self.conn.transaction()?;
        insert_cluster_result(&tx, run_id, result)?;
        tx.commit()?;
        Ok(())
    }

    /// Store every result of a finished run atomically: either all spaces
    /// are written or none are.
    pub fn record_run(&mut self, summary: &RunSummary) -> Result<()> {
        let run_id = summary.run_id.as_str();
        let tx = self.conn.transaction()?;
        for result in &summary.results {
            insert_cluster_result(&tx, run_id, result)?;
        }
        tx.commit()?;
        tracing::info!(
            run_id = %summary.run_id,
            spaces = summary.results.len(),
            "Run persisted"
        );
        Ok(())
    }

    /// Results of a run in the order they were recorded.
    pub fn load_cluster_results(&self, run_id: &str) -> Result<Vec<ClusterResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT space_id, importance, answered_count, user_vector, matches, answers
             FROM cluster_results
             WHERE run_id = ?1
             ORDER BY position ASC",
        )?;
        let rows: Vec<(String, i64, i64, String, String, String)> = stmt
            .query_map([run_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(
                |(space_id, importance, answered_count, user_vector, matches, answers)| -> Result<ClusterResult> {
                let corrupt = |what: &str, err: &dyn std::fmt::Display| {
                    StorageError::Corrupt(format!("{run_id}/{space_id} {what}: {err}"))
                };
                Ok(ClusterResult {
                    importance: Importance::try_from(importance)
                        .map_err(|e| corrupt("importance", &e))?,
                    answered_count: usize::try_from(answered_count)
                        .map_err(|e| corrupt("answered_count", &e))?,
                    user_vector: serde_json::from_str(&user_vector)
                        .map_err(|e| corrupt("user_vector", &e))?,
                    matches: serde_json::from_str(&matches).map_err(|e| corrupt("matches", &e))?,
                    answers: serde_json::from_str(&answers).map_err(|e| corrupt("answers", &e))?,
                    space_id,
                })
                },
            )
            .collect()
    }

    /// Global ranking of a run, aggregated from its stored results.
    pub fn global_scores(&self, run_id: &str) -> Result<Vec<GlobalMemberScore>> {
        Ok(aggregate(&self.load_cluster_results(run_id)?))
    }

    /// Stored runs, most recent first.
    pub fn list_runs(&self) -> Result<Vec<StoredRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, COUNT(*), MAX(recorded_at)
             FROM cluster_results
             GROUP BY run_id
             ORDER BY MAX(recorded_at) DESC, run_id ASC",
        )?;
        let runs = stmt
            .query_map([], |row| {
                let spaces: i64 = row.get(1)?;
                Ok(StoredRun {
                    run_id: row.get(0)?,
                    spaces: spaces as usize,
                    recorded_at: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(runs)
    }
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore")
            .field("path", &self.conn.path())
            .finish()
    }
}
