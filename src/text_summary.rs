//! Text summary builder for CLI output.
//!
//! Formats a completed run as human-readable lines for text mode.

use crate::model::RunOutcome;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a run outcome.
pub(crate) fn build_text_summary(outcome: &RunOutcome) -> TextSummary {
    let mut lines = Vec::new();

    for line in &outcome.output {
        lines.push(line.clone());
    }
    if outcome.truncated {
        lines.push("… output truncated".to_string());
    }

    let verdict = if outcome.succeeded() { "ok" } else { "failed" };
    lines.push(format!(
        "Run {verdict} (status {}) in {} ms",
        outcome.status, outcome.wall_time_ms
    ));

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: i32) -> RunOutcome {
        RunOutcome {
            request_id: "1".into(),
            timestamp_utc: String::new(),
            status,
            output: vec!["hello".into()],
            wall_time_ms: 12,
            truncated: false,
        }
    }

    #[test]
    fn output_lines_come_first() {
        let summary = build_text_summary(&outcome(0));
        assert_eq!(summary.lines[0], "hello");
        assert!(summary.lines.last().unwrap().contains("Run ok"));
    }

    #[test]
    fn failures_are_named() {
        let summary = build_text_summary(&outcome(70));
        assert!(summary.lines.last().unwrap().contains("Run failed"));
        assert!(summary.lines.last().unwrap().contains("status 70"));
    }
}
