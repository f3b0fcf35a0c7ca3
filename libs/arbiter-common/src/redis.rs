use crate::types::{Language, SubmissionJob, SubmissionResult};
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics shared by the API and the workers.
/// Keys are deterministic so both sides agree without coordination.

pub const QUEUE_PREFIX: &str = "arbiter:queue";
pub const RESULT_PREFIX: &str = "arbiter:result";
pub const STATUS_PREFIX: &str = "arbiter:status";

/// Results expire after 24 hours; the grading service copies what it needs.
pub const RESULT_TTL_SECONDS: u64 = 86400;

/// Queue name for a language
pub fn queue_name(language: &Language) -> String {
    format!("{}:{}", QUEUE_PREFIX, language)
}

/// Result key for a job
pub fn result_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

/// Status (verdict) key for a job
pub fn status_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", STATUS_PREFIX, job_id)
}

fn serialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

/// Push a job to its language queue (RPUSH, FIFO with BLPOP).
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    language: &Language,
    job: &SubmissionJob,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(serialization_error)?;
    conn.rpush(queue_name(language), payload).await
}

/// Pop a job from a language queue.
/// BLPOP with a timeout so the worker loop can notice shutdown.
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    language: &Language,
    timeout_seconds: f64,
) -> RedisResult<Option<SubmissionJob>> {
    let result: Option<(String, String)> = conn.blpop(queue_name(language), timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: SubmissionJob = serde_json::from_str(&payload).map_err(|e| {
                redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
            })?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

/// Store a judged result and its verdict, both with the result TTL.
pub async fn store_result(
    conn: &mut redis::aio::ConnectionManager,
    result: &SubmissionResult,
) -> RedisResult<()> {
    let payload = serde_json::to_string(result).map_err(serialization_error)?;
    let _: () = conn.set_ex(result_key(&result.job_id), payload, RESULT_TTL_SECONDS as _).await?;

    // Verdict alone, for cheap polling
    let _: () = conn
        .set_ex(status_key(&result.job_id), result.verdict.code(), RESULT_TTL_SECONDS as _)
        .await?;

    Ok(())
}

/// Fetch a stored result, if the job has been judged.
pub async fn get_result(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<SubmissionResult>> {
    let payload: Option<String> = conn.get(result_key(job_id)).await?;

    match payload {
        Some(data) => {
            let result: SubmissionResult = serde_json::from_str(&data).map_err(|e| {
                redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
            })?;
            Ok(Some(result))
        }
        None => Ok(None),
    }
}
