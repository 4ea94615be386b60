//! Interactive respondent over a line-oriented reader/writer pair.
//!
//! Prompts go to the writer (stderr in the binary) so stdout stays clean for
//! the final report.

use std::io::{BufRead, Write};

use polimatch_core::Result;
use polimatch_core::aggregation::Importance;
use polimatch_core::answers::Score;
use polimatch_core::orchestrator::{Reply, Respondent, RunProgress};
use polimatch_core::ranker::MemberMatch;
use polimatch_core::service::Question;
use polimatch_core::session::CompletionReason;

/// Parse one line of quiz input.
pub fn parse_reply(line: &str) -> Option<Reply> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "agree" | "1" | "+1" => Some(Reply::Answer(Score::Agree)),
        "n" | "no" | "disagree" | "-1" => Some(Reply::Answer(Score::Disagree)),
        "a" | "abstain" | "0" => Some(Reply::Answer(Score::Abstain)),
        "s" | "skip" => Some(Reply::Skip),
        "f" | "finish" | "done" => Some(Reply::Finish),
        _ => None,
    }
}

/// Parse an importance line. Blank means "use the default".
pub fn parse_importance(line: &str) -> Option<Option<Importance>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Some(None);
    }
    let value: i64 = trimmed.parse().ok()?;
    Importance::try_from(value).ok().map(Some)
}

/// Reads answers from `input`, writes prompts to `output`.
pub struct LineRespondent<R, W> {
    input: R,
    output: W,
    current_space: Option<String>,
    /// Shown at the importance prompt; a blank reply gets this value.
    default_importance: Importance,
}

impl<R: BufRead, W: Write> LineRespondent<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            current_space: None,
            default_importance: Importance::DEFAULT,
        }
    }

    /// Match the prompt to `engine.default_importance`.
    #[must_use]
    pub fn with_default_importance(mut self, importance: Importance) -> Self {
        self.default_importance = importance;
        self
    }

    /// `None` at end of input.
    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    fn announce_space(&mut self, progress: &RunProgress) -> Result<()> {
        if self.current_space.as_deref() == Some(progress.space_id.as_str()) {
            return Ok(());
        }
        self.current_space = Some(progress.space_id.clone());
        writeln!(
            self.output,
            "\n== Topic {} ({} of {}) ==",
            progress.space_id,
            progress.space_index + 1,
            progress.space_count
        )?;
        Ok(())
    }
}

impl<R: BufRead, W: Write> Respondent for LineRespondent<R, W> {
    fn respond(&mut self, progress: &RunProgress, question: &Question) -> Result<Reply> {
        self.announce_space(progress)?;

        let bill = &question.bill;
        let title = bill.title.as_deref().unwrap_or(bill.bill_id.as_str());
        writeln!(self.output, "\nQ{}: {title}", progress.question_count + 1)?;
        if let Some(description) = &bill.description {
            writeln!(self.output, "    {description}")?;
        }
        writeln!(self.output, "    ({})", question.rationale)?;

        loop {
            write!(
                self.output,
                "[y]es / [n]o / [a]bstain / [s]kip / [f]inish > "
            )?;
            self.output.flush()?;
            let Some(line) = self.read_line()? else {
                writeln!(self.output)?;
                return Ok(Reply::Finish);
            };
            if let Some(reply) = parse_reply(&line) {
                return Ok(reply);
            }
            writeln!(self.output, "Please answer y, n, a, s or f.")?;
        }
    }

    fn rate(
        &mut self,
        progress: &RunProgress,
        reason: CompletionReason,
        matches: &[MemberMatch],
    ) -> Result<Option<Importance>> {
        self.announce_space(progress)?;
        writeln!(
            self.output,
            "\nDone with {} after {} answers ({reason}). Closest so far:",
            progress.space_id, progress.answered_count
        )?;
        for m in matches {
            writeln!(self.output, "  {}. {} ({:+.3})", m.rank, m.member_id, m.similarity)?;
        }

        loop {
            write!(
                self.output,
                "How important is this topic to you? 1-5 [{}] > ",
                self.default_importance
            )?;
            self.output.flush()?;
            let Some(line) = self.read_line()? else {
                writeln!(self.output)?;
                return Ok(None);
            };
            if let Some(importance) = parse_importance(&line) {
                return Ok(importance);
            }
            writeln!(self.output, "Please enter a number from 1 to 5.")?;
        }
    }
}
