use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use arbiter_common::error::JudgeError;
use arbiter_common::types::{ExecutionReport, SubmissionJob, SyntaxCheck};

use crate::adapters::AdapterRegistry;
use crate::aggregator::{aggregate, syntax_verdict};
use crate::renderer::{RenderedUnit, TemplateRenderer};
use crate::sandbox::Sandbox;

/// Largest accepted submission, in bytes.
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;

/// Sequences one job through render, execute and aggregate.
///
/// Holds no per-job state, so one instance can judge any number of jobs
/// concurrently.
pub struct Orchestrator<S> {
    sandbox: S,
    adapters: AdapterRegistry,
    renderer: TemplateRenderer,
}

impl<S: Sandbox> Orchestrator<S> {
    pub fn new(sandbox: S) -> Self {
        Self::with_adapters(sandbox, AdapterRegistry::builtin())
    }

    pub fn with_adapters(sandbox: S, adapters: AdapterRegistry) -> Self {
        Self {
            sandbox,
            adapters,
            renderer: TemplateRenderer::new(),
        }
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Validate a job and render its unit without running it.
    pub fn prepare(&self, job: &SubmissionJob) -> Result<RenderedUnit, JudgeError> {
        if job.test_cases.is_empty() {
            return Err(JudgeError::EmptySuite);
        }
        check_size(job)?;
        let adapter = self.adapters.resolve(&job.language)?;
        self.renderer.render(adapter, &job.source_code, &job.test_cases)
    }

    /// Parse a submission in its runtime without running any of it.
    ///
    /// A unit that ends without a verdict line is a sandbox failure, not a
    /// verdict on the submission.
    #[instrument(skip(self, job), fields(job_id = %job.id, language = %job.language))]
    pub async fn check_syntax(&self, job: &SubmissionJob) -> Result<SyntaxCheck, JudgeError> {
        check_size(job)?;
        let adapter = self.adapters.resolve(&job.language)?;
        let unit = self.renderer.render_syntax_check(adapter, &job.source_code)?;

        let raw = self.sandbox.execute(&unit, &job.limits).await?;
        let check = syntax_verdict(&raw).ok_or_else(|| {
            JudgeError::Sandbox(format!(
                "syntax check gave no verdict (exit {:?}, timed out: {})",
                raw.exit_code, raw.timed_out
            ))
        })?;
        info!(valid = check.valid, "syntax checked");
        Ok(check)
    }

    /// Judge one submission.
    ///
    /// Submission failures of any kind come back as `Ok` reports; `Err` means the
    /// job was rejected or the sandbox itself failed.
    #[instrument(skip(self, job), fields(job_id = %job.id, language = %job.language))]
    pub async fn judge(&self, job: &SubmissionJob) -> Result<ExecutionReport, JudgeError> {
        let unit = self.prepare(job)?;
        let adapter = self.adapters.resolve(&job.language)?;
        debug!(tests = unit.test_count(), bytes = unit.source.len(), "rendered unit");

        let raw = self.sandbox.execute(&unit, &job.limits).await?;
        debug!(
            exit_code = ?raw.exit_code,
            timed_out = raw.timed_out,
            oom_killed = raw.oom_killed,
            elapsed_ms = raw.elapsed.as_millis() as u64,
            "sandbox finished"
        );

        let report = aggregate(adapter, &unit, &raw);
        info!(
            passed = report.passed,
            total = report.total,
            verdict = %report.verdict(),
            "job judged"
        );
        Ok(report)
    }

    /// Judge many jobs with at most `max_parallel` in flight. Results come back
    /// in completion order, keyed by job id.
    pub async fn judge_all(
        &self,
        jobs: Vec<SubmissionJob>,
        max_parallel: usize,
    ) -> Vec<(Uuid, Result<ExecutionReport, JudgeError>)> {
        stream::iter(jobs)
            .map(|job| async move {
                let result = self.judge(&job).await;
                (job.id, result)
            })
            .buffer_unordered(max_parallel.max(1))
            .collect()
            .await
    }
}

fn check_size(job: &SubmissionJob) -> Result<(), JudgeError> {
    if job.source_code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(JudgeError::SourceTooLarge {
            size: job.source_code.len(),
            limit: MAX_SOURCE_CODE_BYTES,
        });
    }
    Ok(())
}
