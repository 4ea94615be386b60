//! Plain-text and JSON rendering for CLI reports.

use std::fmt::Write;

use serde::Serialize;

use polimatch_core::aggregation::GlobalMemberScore;
use polimatch_core::latent_space::{BillMetadata, LatentSpace, RepresentativeBill};
use polimatch_core::selector::{QuestionProposal, rank_candidates};
use polimatch_core::storage::StoredRun;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
}

/// Summary of one label in an artifact.
#[derive(Debug, Clone, Serialize)]
pub struct SpaceReport {
    pub space_id: String,
    pub usable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub dimensions: usize,
    pub bill_count: usize,
    pub member_count: usize,
    pub explained_variance: Vec<f64>,
    pub representative_bills: Vec<Vec<RepresentativeBill>>,
    /// What a fresh quiz would ask first, best first.
    pub opening_questions: Vec<QuestionProposal>,
}

impl SpaceReport {
    pub fn usable(space: &LatentSpace, top: usize) -> Self {
        Self {
            space_id: space.space_id().to_string(),
            usable: true,
            error: None,
            dimensions: space.dimensions(),
            bill_count: space.bill_count(),
            member_count: space.member_count(),
            explained_variance: space.explained_variance().to_vec(),
            representative_bills: space.representative_bills(top),
            opening_questions: opening_questions(space, top),
        }
    }

    pub fn unusable(space_id: String, error: String) -> Self {
        Self {
            space_id,
            usable: false,
            error: Some(error),
            dimensions: 0,
            bill_count: 0,
            member_count: 0,
            explained_variance: Vec::new(),
            representative_bills: Vec::new(),
            opening_questions: Vec::new(),
        }
    }
}

/// Candidates at maximal uncertainty, as a new session sees them.
fn opening_questions(space: &LatentSpace, top: usize) -> Vec<QuestionProposal> {
    let uncertainty = vec![1.0; space.dimensions()];
    let mut ranked = rank_candidates(space, &uncertainty, |_| false);
    ranked.truncate(top);
    ranked
}

pub fn render_space_reports(
    reports: &[SpaceReport],
    metadata: impl Fn(&str) -> Option<BillMetadata>,
) -> String {
    let mut out = String::new();
    for report in reports {
        let _ = writeln!(out, "Space {}", report.space_id);
        if let Some(error) = &report.error {
            let _ = writeln!(out, "  unusable: {error}");
            continue;
        }
        let _ = writeln!(
            out,
            "  dimensions: {}  bills: {}  members: {}",
            report.dimensions, report.bill_count, report.member_count
        );
        let variance: Vec<String> = report
            .explained_variance
            .iter()
            .map(|v| format!("{v:.3}"))
            .collect();
        let _ = writeln!(out, "  explained variance: [{}]", variance.join(", "));
        for (dim, bills) in report.representative_bills.iter().enumerate() {
            let _ = writeln!(out, "  dimension {}:", dim + 1);
            for bill in bills {
                let title = metadata(&bill.bill_id)
                    .and_then(|m| m.title)
                    .unwrap_or_else(|| bill.bill_id.clone());
                let _ = writeln!(out, "    {:+.3}  {title}", bill.loading);
            }
        }
        if !report.opening_questions.is_empty() {
            let _ = writeln!(out, "  opening questions:");
            for q in &report.opening_questions {
                let title = metadata(&q.bill_id)
                    .and_then(|m| m.title)
                    .unwrap_or_else(|| q.bill_id.clone());
                let _ = writeln!(out, "    {:.3}  {title}  ({})", q.score, q.rationale);
            }
        }
    }
    out
}

pub fn render_global(run_id: &str, global: &[GlobalMemberScore], top: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run {run_id}");
    if global.is_empty() {
        let _ = writeln!(out, "No results recorded.");
        return out;
    }
    let _ = writeln!(out, "{:>4}  {:<24}  {:>7}  per space", "rank", "member", "score");
    for (i, score) in global.iter().take(top).enumerate() {
        let per_space: Vec<String> = score
            .per_space_scores
            .iter()
            .map(|(space, s)| format!("{space}={s:+.2}"))
            .collect();
        let _ = writeln!(
            out,
            "{:>4}  {:<24}  {:>+7.3}  {}",
            i + 1,
            score.member_id,
            score.global_score,
            per_space.join(" ")
        );
    }
    out
}

pub fn render_runs(runs: &[StoredRun]) -> String {
    let mut out = String::new();
    if runs.is_empty() {
        let _ = writeln!(out, "No stored runs.");
        return out;
    }
    for run in runs {
        let _ = writeln!(out, "{}  {} spaces  {}", run.run_id, run.spaces, run.recorded_at);
    }
    out
}
