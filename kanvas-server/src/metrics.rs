//! Prometheus metrics for kanvas-server.
//!
//! Provides metrics collection and a Prometheus-compatible `/metrics` endpoint.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// Metric names as constants for consistency
const GENERATIONS_STARTED_TOTAL: &str = "kanvas_generations_started_total";
const GENERATIONS_FINISHED_TOTAL: &str = "kanvas_generations_finished_total";
const GENERATIONS_ACTIVE: &str = "kanvas_generations_active";
const RETRY_ATTEMPTS_TOTAL: &str = "kanvas_retry_attempts_total";
const SAVE_CONFLICTS_TOTAL: &str = "kanvas_save_conflicts_total";
const VALIDATION_FAILURES_TOTAL: &str = "kanvas_validation_failures_total";
const ASSET_ISSUES_TOTAL: &str = "kanvas_asset_issues_total";
const AUTOSAVES_TOTAL: &str = "kanvas_autosaves_total";
const SSE_CLIENTS_ACTIVE: &str = "kanvas_sse_clients_active";

/// Initialize metrics and return the Prometheus handle.
///
/// # Errors
///
/// Returns an error if the Prometheus recorder cannot be installed
/// (e.g., if another recorder is already installed).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record an accepted generation.
///
/// * `kind` - "image" or "video"
pub fn record_generation_started(kind: &str) {
    counter!(GENERATIONS_STARTED_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Record a generation reaching a terminal state.
///
/// * `kind` - "image" or "video"
/// * `outcome` - "completed" or "failed"
pub fn record_generation_finished(kind: &str, outcome: &str) {
    counter!(
        GENERATIONS_FINISHED_TOTAL,
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Update the number of generations in flight.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_generations(count: usize) {
    gauge!(GENERATIONS_ACTIVE).set(count as f64);
}

/// Record a retry of a network operation.
///
/// * `operation` - e.g. "provider.status", "storage.upload"
pub fn record_retry(operation: &str) {
    counter!(RETRY_ATTEMPTS_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// Record a save that lost to a newer stored version.
pub fn record_save_conflict() {
    counter!(SAVE_CONFLICTS_TOTAL).increment(1);
}

/// Record an input validation failure.
///
/// * `validation_type` - Type of validation that failed (project_id, prompt, count, etc.)
pub fn record_validation_failure(validation_type: &str) {
    counter!(
        VALIDATION_FAILURES_TOTAL,
        "type" => validation_type.to_string()
    )
    .increment(1);
}

/// Record asset issues found during validation or reconciliation.
pub fn record_asset_issues(label: &str, count: usize) {
    counter!(ASSET_ISSUES_TOTAL, "issue" => label.to_string()).increment(count as u64);
}

/// Record an autosave attempt.
///
/// * `outcome` - "success" or "failure"
pub fn record_autosave(outcome: &str) {
    counter!(AUTOSAVES_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

/// Increment connected SSE clients.
pub fn inc_sse_clients() {
    gauge!(SSE_CLIENTS_ACTIVE).increment(1.0);
}

/// Decrement connected SSE clients.
pub fn dec_sse_clients() {
    gauge!(SSE_CLIENTS_ACTIVE).decrement(1.0);
}
