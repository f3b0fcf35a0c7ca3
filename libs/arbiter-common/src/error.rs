use thiserror::Error;

/// Errors the judging pipeline reports instead of a report.
///
/// User-code misbehaviour never ends up here; it is turned into report data.
/// These are configuration, validation and infrastructure failures.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("submission has no test cases")]
    EmptySuite,

    #[error("test case {index} is malformed: {reason}")]
    InvalidTestCase { index: usize, reason: String },

    #[error("source code is {size} bytes, limit is {limit}")]
    SourceTooLarge { size: usize, limit: usize },

    #[error("failed to render harness: {0}")]
    Render(String),

    #[error("sandbox: {0}")]
    Sandbox(String),
}

impl JudgeError {
    /// Errors caused by the job itself rather than by the judge's infrastructure.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, JudgeError::Sandbox(_) | JudgeError::Render(_))
    }
}
