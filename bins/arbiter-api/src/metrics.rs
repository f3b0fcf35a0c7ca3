// Prometheus metrics for the Arbiter API

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    pub static ref JOBS_SUBMITTED: IntCounterVec = register_int_counter_vec!(
        "arbiter_jobs_submitted_total",
        "Jobs accepted and queued",
        &["language"]
    )
    .expect("metric can be registered");

    pub static ref JOBS_REJECTED: IntCounterVec = register_int_counter_vec!(
        "arbiter_jobs_rejected_total",
        "Submissions refused before queueing",
        &["reason"]
    )
    .expect("metric can be registered");

    pub static ref RESULTS_SERVED: IntCounterVec = register_int_counter_vec!(
        "arbiter_results_served_total",
        "Stored results returned to callers",
        &["verdict"]
    )
    .expect("metric can be registered");
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
