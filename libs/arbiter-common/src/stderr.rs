//! Filtering of diagnostics before they are shown to the submitter.
//!
//! Raw stderr stays in the stored report for staff; submitters only see lines
//! that do not leak sandbox internals.

const SENSITIVE_MARKERS: [&str; 5] = ["/code/", "/tmp/", "/sandbox/", "docker", "container"];

/// Maximum number of lines kept after filtering.
pub const MAX_VISIBLE_LINES: usize = 20;

/// Drop lines mentioning sandbox paths or the container runtime and keep the first
/// `MAX_VISIBLE_LINES` of what remains.
pub fn filter_for_submitter(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            !SENSITIVE_MARKERS.iter().any(|marker| lower.contains(marker))
        })
        .take(MAX_VISIBLE_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Last non-empty line, which is where most runtimes put the exception summary.
pub fn last_meaningful_line(stderr: &str) -> Option<&str> {
    stderr.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}
