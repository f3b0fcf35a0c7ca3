// HTTP route handlers for the Arbiter API

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use arbiter_common::error::JudgeError;
use arbiter_common::redis;
use arbiter_common::types::{JobMode, Language, ResourceLimits, SubmissionJob, TestCase};
use arbiter_harness::{AdapterRegistry, TemplateRenderer, MAX_SOURCE_CODE_BYTES};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::language_config::LanguageRegistry;
use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub language: String,
    pub source_code: String,
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub limits: ResourceLimits,
}

/// Body of `POST /validate`: parse only, no suite.
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub limits: ResourceLimits,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Label for the rejection counter.
fn rejection_reason(error: &JudgeError) -> &'static str {
    match error {
        JudgeError::UnsupportedLanguage(_) => "unsupported_language",
        JudgeError::EmptySuite => "empty_suite",
        JudgeError::InvalidTestCase { .. } => "invalid_test_case",
        JudgeError::SourceTooLarge { .. } => "source_too_large",
        JudgeError::Render(_) | JudgeError::Sandbox(_) => "internal",
    }
}

/// Check a submission the same way the worker will, so bad jobs are refused
/// up front instead of occupying a sandbox slot.
pub fn validate(
    languages: &LanguageRegistry,
    adapters: &AdapterRegistry,
    renderer: &TemplateRenderer,
    request: SubmitRequest,
) -> Result<(Language, SubmissionJob), JudgeError> {
    let language = enabled_language(languages, &request.language)?;

    if request.test_cases.is_empty() {
        return Err(JudgeError::EmptySuite);
    }
    check_size(&request.source_code)?;

    // Dry render catches selector conflicts and invalid callable names
    let adapter = adapters.resolve(&request.language)?;
    renderer.render(adapter, &request.source_code, &request.test_cases)?;

    let job = SubmissionJob {
        id: Uuid::new_v4(),
        language: language.as_str().to_string(),
        source_code: request.source_code,
        test_cases: request.test_cases,
        limits: request.limits,
        mode: JobMode::Judge,
    };
    Ok((language, job))
}

/// Same checks for a syntax-only job; there is no suite to render.
pub fn validate_syntax_check(
    languages: &LanguageRegistry,
    adapters: &AdapterRegistry,
    request: ValidateRequest,
) -> Result<(Language, SubmissionJob), JudgeError> {
    let language = enabled_language(languages, &request.language)?;
    check_size(&request.source_code)?;
    adapters.resolve(&request.language)?;

    let job = SubmissionJob {
        id: Uuid::new_v4(),
        language: language.as_str().to_string(),
        source_code: request.source_code,
        test_cases: Vec::new(),
        limits: request.limits,
        mode: JobMode::SyntaxCheck,
    };
    Ok((language, job))
}

fn enabled_language(languages: &LanguageRegistry, identifier: &str) -> Result<Language, JudgeError> {
    Language::from_str(identifier)
        .filter(|language| languages.is_enabled(*language))
        .ok_or_else(|| JudgeError::UnsupportedLanguage(identifier.to_string()))
}

fn check_size(source_code: &str) -> Result<(), JudgeError> {
    if source_code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(JudgeError::SourceTooLarge {
            size: source_code.len(),
            limit: MAX_SOURCE_CODE_BYTES,
        });
    }
    Ok(())
}

fn reject(e: JudgeError) -> Response {
    warn!(error = %e, "Submission rejected");
    metrics::JOBS_REJECTED.with_label_values(&[rejection_reason(&e)]).inc();
    let status = match e {
        JudgeError::SourceTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        JudgeError::Render(_) | JudgeError::Sandbox(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    error_body(status, e.to_string())
}

/// POST /execute - Submit a job for execution
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    match validate(&state.languages, &state.adapters, &state.renderer, payload) {
        Ok((language, job)) => enqueue(&state, language, job).await,
        Err(e) => reject(e),
    }
}

/// POST /validate - Queue a syntax-only check; poll /job/{job_id} for the verdict
pub async fn submit_syntax_check(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateRequest>,
) -> Response {
    match validate_syntax_check(&state.languages, &state.adapters, payload) {
        Ok((language, job)) => enqueue(&state, language, job).await,
        Err(e) => reject(e),
    }
}

async fn enqueue(state: &AppState, language: Language, job: SubmissionJob) -> Response {
    // Push to Redis queue
    let mut conn = state.redis.clone();
    match redis::push_job(&mut conn, &language, &job).await {
        Ok(()) => {
            info!(
                job_id = %job.id,
                language = %language,
                mode = ?job.mode,
                test_cases = job.test_cases.len(),
                "Job queued"
            );
            metrics::JOBS_SUBMITTED.with_label_values(&[language.as_str()]).inc();

            (
                StatusCode::CREATED,
                Json(SubmitResponse {
                    job_id: job.id.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Failed to queue job");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to queue job: {}", e))
        }
    }
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /languages - Enabled language identifiers
pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.languages.enabled_languages())
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /job/{job_id} - Query execution result
pub async fn get_job_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    let job_uuid = match Uuid::parse_str(&job_id) {
        Ok(id) => id,
        Err(_) => return error_body(StatusCode::BAD_REQUEST, "Invalid job ID format"),
    };

    let mut conn = state.redis.clone();
    match redis::get_result(&mut conn, &job_uuid).await {
        Ok(Some(result)) => {
            info!(job_id = %job_id, verdict = %result.verdict, "Job result retrieved");
            metrics::RESULTS_SERVED.with_label_values(&[result.verdict.code()]).inc();
            (StatusCode::OK, Json(result)).into_response()
        }
        Ok(None) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "job_id": job_id,
                "status": "pending",
                "message": "Job is queued or still executing"
            })),
        )
            .into_response(),
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to fetch job result");
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to query job status: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registries() -> (LanguageRegistry, AdapterRegistry, TemplateRenderer) {
        let languages =
            LanguageRegistry::from_json(r#"{"languages": [{"name": "python"}, {"name": "javascript"}]}"#).unwrap();
        (languages, AdapterRegistry::builtin(), TemplateRenderer::new())
    }

    fn request(value: serde_json::Value) -> SubmitRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_valid_submission_becomes_job() {
        let (languages, adapters, renderer) = registries();
        let (language, job) = validate(
            &languages,
            &adapters,
            &renderer,
            request(json!({
                "language": "py",
                "source_code": "def add(a, b):\n    return a + b\n",
                "test_cases": [{"expected": "5", "function_call": {"name": "add", "args": [2, 3]}}],
                "limits": {"time_limit_ms": 1000}
            })),
        )
        .unwrap();

        assert_eq!(language, Language::Python);
        assert_eq!(job.language, "python");
        assert_eq!(job.test_cases.len(), 1);
        assert_eq!(job.limits.time_limit_ms, Some(1000));
    }

    #[test]
    fn test_disabled_language_is_rejected() {
        let (languages, adapters, renderer) = registries();
        let err = validate(
            &languages,
            &adapters,
            &renderer,
            request(json!({"language": "ruby", "source_code": "", "test_cases": [{"expected": "1"}]})),
        )
        .unwrap_err();
        assert_eq!(rejection_reason(&err), "unsupported_language");
    }

    #[test]
    fn test_bad_suites_are_rejected() {
        let (languages, adapters, renderer) = registries();

        let empty = validate(
            &languages,
            &adapters,
            &renderer,
            request(json!({"language": "python", "source_code": "", "test_cases": []})),
        )
        .unwrap_err();
        assert!(matches!(empty, JudgeError::EmptySuite));

        let both = validate(
            &languages,
            &adapters,
            &renderer,
            request(json!({
                "language": "javascript",
                "source_code": "",
                "test_cases": [{"expected": "1", "code": "f()", "function_call": {"name": "f"}}]
            })),
        )
        .unwrap_err();
        assert!(matches!(both, JudgeError::InvalidTestCase { index: 0, .. }));

        let injected = validate(
            &languages,
            &adapters,
            &renderer,
            request(json!({
                "language": "javascript",
                "source_code": "",
                "test_cases": [{"expected": "1", "function_call": {"name": "process.exit"}}]
            })),
        )
        .unwrap_err();
        assert_eq!(rejection_reason(&injected), "invalid_test_case");

        let keyword = validate(
            &languages,
            &adapters,
            &renderer,
            request(json!({
                "language": "javascript",
                "source_code": "function f(a) { return a; }",
                "test_cases": [{"expected": "1", "function_call": {"name": "f", "kwargs": {"a": 1}}}]
            })),
        )
        .unwrap_err();
        assert!(matches!(keyword, JudgeError::InvalidTestCase { index: 0, .. }));
    }

    #[test]
    fn test_syntax_check_request_needs_no_suite() {
        let (languages, adapters, _) = registries();
        let (language, job) = validate_syntax_check(
            &languages,
            &adapters,
            serde_json::from_value(json!({"language": "node", "source_code": "function f( {"})).unwrap(),
        )
        .unwrap();
        assert_eq!(language, Language::JavaScript);
        assert_eq!(job.mode, JobMode::SyntaxCheck);
        assert!(job.test_cases.is_empty());

        let too_large = validate_syntax_check(
            &languages,
            &adapters,
            ValidateRequest {
                language: "python".to_string(),
                source_code: "#".repeat(MAX_SOURCE_CODE_BYTES + 1),
                limits: ResourceLimits::default(),
            },
        )
        .unwrap_err();
        assert_eq!(rejection_reason(&too_large), "source_too_large");

        let disabled = validate_syntax_check(
            &languages,
            &adapters,
            serde_json::from_value(json!({"language": "php", "source_code": "<?php"})).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(disabled, JudgeError::UnsupportedLanguage(_)));
    }
}
