//! Job executor: turns one queued job into a storable result.
//!
//! The orchestrator returns `Err` only for rejected jobs and infrastructure
//! failures; both are stored as system-error results so the grading service
//! always finds an answer under the job id.

use arbiter_common::error::JudgeError;
use arbiter_common::types::{JobMode, SubmissionJob, SubmissionResult};
use arbiter_harness::{Orchestrator, Sandbox};
use tracing::{error, info, warn};

pub async fn execute_job<S: Sandbox>(
    orchestrator: &Orchestrator<S>,
    job: &SubmissionJob,
) -> SubmissionResult {
    let start = std::time::Instant::now();

    let result = match job.mode {
        JobMode::Judge => judge(orchestrator, job).await,
        JobMode::SyntaxCheck => match orchestrator.check_syntax(job).await {
            Ok(check) => SubmissionResult::from_syntax_check(job, check),
            Err(e) => failed(job, e),
        },
    };

    info!(
        job_id = %job.id,
        mode = ?job.mode,
        verdict = %result.verdict,
        score = result.score,
        execution_ms = start.elapsed().as_millis() as u64,
        "Execution completed"
    );

    result
}

async fn judge<S: Sandbox>(orchestrator: &Orchestrator<S>, job: &SubmissionJob) -> SubmissionResult {
    match orchestrator.judge(job).await {
        Ok(report) => {
            if let Some(failure) = &report.failure {
                if failure.kind.is_system_fault() {
                    error!(job_id = %job.id, kind = %failure.kind, message = %failure.message, "Harness fault");
                } else {
                    info!(job_id = %job.id, kind = %failure.kind, "Submission failed before reporting");
                }
            }
            SubmissionResult::from_report(job, report)
        }
        Err(e) => failed(job, e),
    }
}

fn failed(job: &SubmissionJob, e: JudgeError) -> SubmissionResult {
    if e.is_rejection() {
        warn!(job_id = %job.id, error = %e, "Job rejected");
    } else {
        error!(job_id = %job.id, error = %e, "Job execution failed");
    }
    SubmissionResult::system_error(job, &e)
}
