//! Turns raw sandbox output into a normalized [`ExecutionReport`].
//!
//! The harness report is trusted for structure only. Names must line up with the
//! suite, expected outputs come from the host copy of the suite, per-test
//! verdicts and totals are recomputed here, and every process-level failure
//! becomes a synthetic report covering all tests of the unit.

use tracing::warn;

use arbiter_common::stderr::{filter_for_submitter, last_meaningful_line};
use arbiter_common::types::{
    normalize_output, outputs_match, ErrorKind, ExecutionReport, Failure, SyntaxCheck, TestOutcome,
};

use crate::adapters::LanguageAdapter;
use crate::renderer::RenderedUnit;
use crate::sandbox::RawExecution;

/// Upper bound on stderr kept in a synthetic report.
pub const MAX_REPORTED_STDERR_BYTES: usize = 16 * 1024;

pub fn aggregate(
    adapter: &dyn LanguageAdapter,
    unit: &RenderedUnit,
    raw: &RawExecution,
) -> ExecutionReport {
    if raw.timed_out {
        return synthetic(
            unit,
            ErrorKind::Timeout,
            format!("wall-clock limit of {}ms exceeded", raw.wall_time_limit_ms),
            &raw.stderr,
        );
    }

    if raw.oom_killed {
        return synthetic(
            unit,
            ErrorKind::MemoryLimitExceeded,
            "memory limit exceeded".to_string(),
            &raw.stderr,
        );
    }

    if let Some(mut report) = parse_report(&raw.stdout) {
        if report.tests.len() != unit.test_count() {
            warn!(
                language = %unit.language,
                reported = report.tests.len(),
                expected = unit.test_count(),
                "harness reported wrong number of results"
            );
            return synthetic(
                unit,
                ErrorKind::HarnessFault,
                format!(
                    "harness reported {} results for {} tests",
                    report.tests.len(),
                    unit.test_count()
                ),
                &raw.stderr,
            );
        }
        if let Some((position, reported)) = misplaced_result(&report, unit) {
            warn!(
                language = %unit.language,
                position,
                reported = %reported,
                "harness reported results out of order"
            );
            return synthetic(
                unit,
                ErrorKind::HarnessFault,
                format!(
                    "harness reported results out of order: '{}' at position {}, expected '{}'",
                    reported,
                    position + 1,
                    unit.test_names[position]
                ),
                &raw.stderr,
            );
        }
        normalize(&mut report, unit);
        return report;
    }

    match raw.exit_code {
        Some(code) if code != 0 => {
            let kind = adapter.classify_startup_failure(&raw.stderr);
            synthetic(unit, kind, startup_message(code, &raw.stderr), &raw.stderr)
        }
        _ if raw.stdout.trim().is_empty() => synthetic(
            unit,
            ErrorKind::RuntimeCrash,
            "process ended before reporting results".to_string(),
            &raw.stderr,
        ),
        _ if raw.stdout_truncated => synthetic(
            unit,
            ErrorKind::RuntimeCrash,
            "output limit exceeded before results were reported".to_string(),
            &raw.stderr,
        ),
        _ => {
            warn!(
                language = %unit.language,
                stdout_bytes = raw.stdout.len(),
                "harness output could not be parsed"
            );
            synthetic(
                unit,
                ErrorKind::HarnessFault,
                "harness output could not be parsed".to_string(),
                &raw.stderr,
            )
        }
    }
}

/// Verdict line of a syntax-check unit; `None` when the unit never produced one.
pub fn syntax_verdict(raw: &RawExecution) -> Option<SyntaxCheck> {
    if raw.timed_out || raw.oom_killed {
        return None;
    }
    let line = raw.stdout.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    let mut check: SyntaxCheck = serde_json::from_str(line).ok()?;
    if check.valid {
        check.error = None;
    } else {
        let message = check.error.take().unwrap_or_else(|| "syntax error".to_string());
        check.error = Some(truncate(&message, MAX_REPORTED_STDERR_BYTES));
    }
    Some(check)
}

/// The report is the last non-empty line of stdout.
fn parse_report(stdout: &str) -> Option<ExecutionReport> {
    let line = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    let report: ExecutionReport = serde_json::from_str(line).ok()?;
    // A harness never sends `failure`; a line that does is not ours.
    if report.failure.is_some() {
        return None;
    }
    Some(report)
}

fn misplaced_result<'a>(report: &'a ExecutionReport, unit: &RenderedUnit) -> Option<(usize, &'a str)> {
    report
        .tests
        .iter()
        .zip(&unit.test_names)
        .position(|(test, name)| test.name != *name)
        .map(|position| (position, report.tests[position].name.as_str()))
}

/// Expected outputs are taken from the unit, never from the harness.
fn normalize(report: &mut ExecutionReport, unit: &RenderedUnit) {
    for (test, suite_expected) in report.tests.iter_mut().zip(&unit.expected) {
        test.passed = match &mut test.outcome {
            TestOutcome::Compared { expected, actual } => {
                *expected = normalize_output(suite_expected).to_string();
                outputs_match(expected, actual)
            }
            TestOutcome::Raised { .. } => false,
        };
        if !test.time.is_finite() || test.time < 0.0 {
            test.time = 0.0;
        }
    }
    report.recompute_totals();
}

fn startup_message(exit_code: i64, stderr: &str) -> String {
    let visible = filter_for_submitter(stderr);
    let summary = last_meaningful_line(&visible)
        .map(str::to_string)
        .unwrap_or_else(|| format!("process exited with status {}", exit_code));
    match exit_code {
        137 => format!("{} (killed by SIGKILL, exit 137)", summary),
        139 => format!("{} (segmentation fault, exit 139)", summary),
        _ => summary,
    }
}

fn synthetic(unit: &RenderedUnit, kind: ErrorKind, message: String, stderr: &str) -> ExecutionReport {
    ExecutionReport::synthetic(
        &unit.test_names,
        Failure {
            kind,
            message,
            stderr: truncate(stderr, MAX_REPORTED_STDERR_BYTES),
        },
    )
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (truncated)", &text[..end])
}
