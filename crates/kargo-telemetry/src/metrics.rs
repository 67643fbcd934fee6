//! Prometheus metrics for the authorization core.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `kargo_authz_decisions_total` | Counter | `outcome`, `basis` | Authorization decisions |
//! | `kargo_access_reviews_total` | Counter | `subject`, `outcome` | Access reviews sent to the cluster |
//! | `kargo_access_review_duration_seconds` | Histogram | `subject` | Access review latency |
//!
//! Recording functions are safe to call before [`init_metrics`]; the
//! `metrics` facade drops observations when no recorder is installed.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Name of the decision counter.
pub const AUTHZ_DECISIONS_TOTAL: &str = "kargo_authz_decisions_total";

/// Name of the access review counter.
pub const ACCESS_REVIEWS_TOTAL: &str = "kargo_access_reviews_total";

/// Name of the access review latency histogram.
pub const ACCESS_REVIEW_DURATION_SECONDS: &str = "kargo_access_review_duration_seconds";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Buckets for the access review latency histogram, in seconds.
    pub review_duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // 5ms .. 5s
            review_duration_buckets: vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        }
    }
}

/// Installs the global Prometheus recorder.
///
/// The rendered exposition is available through [`render_metrics`]; serving
/// it over HTTP is left to the API server.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if a recorder is already installed
/// or the bucket configuration is invalid.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(ACCESS_REVIEW_DURATION_SECONDS.to_string()),
            &config.review_duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    describe_metrics();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn describe_metrics() {
    describe_counter!(
        AUTHZ_DECISIONS_TOTAL,
        "Authorization decisions by outcome and the basis they were made on"
    );
    describe_counter!(
        ACCESS_REVIEWS_TOTAL,
        "Access reviews sent to the cluster by subject kind and outcome"
    );
    describe_histogram!(
        ACCESS_REVIEW_DURATION_SECONDS,
        "Access review round-trip time in seconds"
    );
}

/// Records an authorization decision.
///
/// * `outcome` - "allowed", "not_allowed", "forbidden", "error" or "cancelled"
/// * `basis` - what the decision rested on, e.g. "admin", "service_account",
///   "caller", "unchecked" or "none"
pub fn record_authz_decision(outcome: &'static str, basis: &'static str) {
    counter!(AUTHZ_DECISIONS_TOTAL, "outcome" => outcome, "basis" => basis).increment(1);
}

/// Records an access review round trip.
///
/// * `subject` - "service_account" or "caller"
/// * `outcome` - "allowed", "denied", "forbidden" or "error"
pub fn record_access_review(subject: &'static str, outcome: &'static str, duration: Duration) {
    counter!(ACCESS_REVIEWS_TOTAL, "subject" => subject, "outcome" => outcome).increment(1);
    histogram!(ACCESS_REVIEW_DURATION_SECONDS, "subject" => subject)
        .record(duration.as_secs_f64());
}
