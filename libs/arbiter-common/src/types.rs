use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::JudgeError;

/// Languages with a runtime adapter.
///
/// Jobs carry the language as a plain identifier string; this enum is what the
/// identifier resolves to once an adapter is found for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Ruby,
    Php,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::JavaScript,
        Language::Ruby,
        Language::Php,
    ];

    /// Resolve an identifier (case-insensitive, common aliases accepted).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Language::Python),
            "javascript" | "js" | "node" | "nodejs" => Some(Language::JavaScript),
            "ruby" | "rb" => Some(Language::Ruby),
            "php" => Some(Language::Php),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Ruby => "ruby",
            Language::Php => "php",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selector naming a user-defined callable and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Keyword arguments, for languages that have them.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

/// One hidden test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// How the harness drives a test case.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selector<'a> {
    Call(&'a FunctionCall),
    Eval(&'a str),
    /// Neither selector: run the submission as a program fed with `input`.
    Stdio,
}

impl TestCase {
    /// Label used in results; ordinal (1-based) when the case has no name.
    pub fn display_name(&self, index: usize) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("Test {}", index + 1),
        }
    }

    /// At most one of `function_call` / `code` may be set.
    pub fn selector(&self, index: usize) -> Result<Selector<'_>, JudgeError> {
        match (&self.function_call, &self.code) {
            (Some(_), Some(_)) => Err(JudgeError::InvalidTestCase {
                index,
                reason: "both function_call and code are set".to_string(),
            }),
            (Some(call), None) => Ok(Selector::Call(call)),
            (None, Some(code)) => Ok(Selector::Eval(code)),
            (None, None) => Ok(Selector::Stdio),
        }
    }
}

/// Requested resource ceilings. Unset fields fall back to the language defaults
/// configured on the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Per-test time budget in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u32>,
}

/// What the worker does with a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    #[default]
    Judge,
    /// Parse the submission without executing it; the suite is ignored.
    SyntaxCheck,
}

/// One grading request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionJob {
    pub id: Uuid,
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub mode: JobMode,
}

/// Outcome of parsing a submission without running it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntaxCheck {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Failure taxonomy shared by every language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    CompileOrParseError,
    RuntimeException,
    Timeout,
    RuntimeCrash,
    HarnessFault,
    Mismatch,
    MemoryLimitExceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CompileOrParseError => "CompileOrParseError",
            ErrorKind::RuntimeException => "RuntimeException",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::RuntimeCrash => "RuntimeCrash",
            ErrorKind::HarnessFault => "HarnessFault",
            ErrorKind::Mismatch => "Mismatch",
            ErrorKind::MemoryLimitExceeded => "MemoryLimitExceeded",
        }
    }

    /// True when the failure is a defect of the judge rather than of the submission.
    pub fn is_system_fault(&self) -> bool {
        matches!(self, ErrorKind::HarnessFault)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either the compared pair or the raised error; never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestOutcome {
    Compared {
        /// Filled in from the suite on the host; harnesses may omit it.
        #[serde(default)]
        expected: String,
        actual: String,
    },
    Raised { error: String, error_type: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    /// Seconds, measured with a monotonic clock.
    pub time: f64,
    #[serde(flatten)]
    pub outcome: TestOutcome,
}

impl TestResult {
    /// Per-test classification; `None` for a passing test.
    pub fn kind(&self) -> Option<ErrorKind> {
        if self.passed {
            return None;
        }
        match self.outcome {
            TestOutcome::Compared { .. } => Some(ErrorKind::Mismatch),
            TestOutcome::Raised { .. } => Some(ErrorKind::RuntimeException),
        }
    }
}

/// Process-level failure attached to synthetic reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

/// Normalized result of judging one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub tests: Vec<TestResult>,
    pub total_time: f64,
    pub passed: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl ExecutionReport {
    /// Build a report from per-test results, deriving the totals.
    pub fn from_tests(tests: Vec<TestResult>) -> Self {
        let mut report = ExecutionReport {
            tests,
            total_time: 0.0,
            passed: 0,
            total: 0,
            failure: None,
        };
        report.recompute_totals();
        report
    }

    /// Report for a run that never produced per-test data: every test is marked as
    /// not passed with `error_type` set to the failure kind.
    pub fn synthetic(test_names: &[String], failure: Failure) -> Self {
        let tests = test_names
            .iter()
            .map(|name| TestResult {
                name: name.clone(),
                passed: false,
                time: 0.0,
                outcome: TestOutcome::Raised {
                    error: failure.message.clone(),
                    error_type: failure.kind.to_string(),
                },
            })
            .collect();
        let mut report = Self::from_tests(tests);
        report.failure = Some(failure);
        report
    }

    /// Derive `passed`, `total` and `total_time` from the test sequence.
    pub fn recompute_totals(&mut self) {
        self.total = self.tests.len();
        self.passed = self.tests.iter().filter(|t| t.passed).count();
        self.total_time = self.tests.iter().map(|t| t.time.max(0.0)).sum();
    }

    pub fn verdict(&self) -> Verdict {
        if let Some(failure) = &self.failure {
            return match failure.kind {
                ErrorKind::Timeout => Verdict::TimeLimitExceeded,
                ErrorKind::MemoryLimitExceeded => Verdict::MemoryLimitExceeded,
                ErrorKind::CompileOrParseError => Verdict::CompilationError,
                ErrorKind::RuntimeCrash | ErrorKind::RuntimeException => Verdict::RuntimeError,
                ErrorKind::HarnessFault => Verdict::SystemError,
                ErrorKind::Mismatch => Verdict::WrongAnswer,
            };
        }
        if self.total > 0 && self.passed == self.total {
            Verdict::Accepted
        } else if self.tests.iter().any(|t| t.kind() == Some(ErrorKind::RuntimeException)) {
            Verdict::RuntimeError
        } else {
            Verdict::WrongAnswer
        }
    }

    /// Percentage of passed tests, rounded down.
    pub fn score(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.passed * 100) / self.total) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "AC")]
    Accepted,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "MLE")]
    MemoryLimitExceeded,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "CE")]
    CompilationError,
    #[serde(rename = "SE")]
    SystemError,
}

impl Verdict {
    pub fn code(&self) -> &'static str {
        match self {
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::RuntimeError => "RE",
            Verdict::CompilationError => "CE",
            Verdict::SystemError => "SE",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// What the worker stores for the grading service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub job_id: Uuid,
    pub language: String,
    pub verdict: Verdict,
    pub score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ExecutionReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub judged_at: DateTime<Utc>,
}

impl SubmissionResult {
    pub fn from_report(job: &SubmissionJob, report: ExecutionReport) -> Self {
        Self {
            job_id: job.id,
            language: job.language.clone(),
            verdict: report.verdict(),
            score: report.score(),
            report: Some(report),
            error: None,
            judged_at: Utc::now(),
        }
    }

    /// Result of a syntax-only job: AC when the source parses, CE otherwise.
    pub fn from_syntax_check(job: &SubmissionJob, check: SyntaxCheck) -> Self {
        let (verdict, score) = if check.valid {
            (Verdict::Accepted, 100)
        } else {
            (Verdict::CompilationError, 0)
        };
        Self {
            job_id: job.id,
            language: job.language.clone(),
            verdict,
            score,
            report: None,
            error: if check.valid { None } else { check.error },
            judged_at: Utc::now(),
        }
    }

    /// Result for a job the judge could not run at all.
    pub fn system_error(job: &SubmissionJob, error: &JudgeError) -> Self {
        Self {
            job_id: job.id,
            language: job.language.clone(),
            verdict: Verdict::SystemError,
            score: 0,
            report: None,
            error: Some(error.to_string()),
            judged_at: Utc::now(),
        }
    }
}

/// Trim surrounding whitespace before comparing outputs.
///
/// Internal whitespace and case are preserved; `\r\n` endings at the edges are
/// removed with the rest of the whitespace.
pub fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Exact equality after trimming both sides. No numeric tolerance.
pub fn outputs_match(expected: &str, actual: &str) -> bool {
    normalize_output(expected) == normalize_output(actual)
}
