//! Plain-text rendering of a finished download phase.

use std::error::Error;
use std::fmt::Write as _;

use crate::capability::TaskLabel;
use crate::result::{PipelineResult, TaskOutcome};

/// Joins an error and its sources with ": ".
pub fn error_chain(err: &dyn Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// One line per task, successes first, each group sorted by label. Failures
/// are tagged with the kind of the last error seen.
pub fn render<T: TaskLabel, O>(results: &PipelineResult<T, O>) -> String {
    let mut out = format!(
        "{} task(s): {} succeeded, {} failed\n",
        results.len(),
        results.success_count(),
        results.failure_count()
    );

    let mut rows: Vec<_> = results.iter().collect();
    rows.sort_by(|a, b| {
        b.is_success()
            .cmp(&a.is_success())
            .then_with(|| a.label().cmp(b.label()))
    });

    for row in rows {
        match &row.outcome {
            TaskOutcome::Succeeded(_) => {
                let _ = writeln!(out, "  ok    {} ({} attempt(s))", row.label(), row.attempts);
            }
            TaskOutcome::Failed(err) => {
                let kind = err
                    .last_error()
                    .map(|e| e.kind().to_string())
                    .unwrap_or_else(|| "cancelled".to_string());
                let _ = writeln!(
                    out,
                    "  FAIL  {} [{}]: {}",
                    row.label(),
                    kind,
                    error_chain(err)
                );
            }
        }
    }
    out
}
