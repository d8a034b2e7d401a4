//! Prometheus metrics for chat traffic and token acquisition.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::debug;

use crate::identity::CredentialKind;

// === Metric Name Constants ===

/// Chat completion requests counter metric name.
pub const METRIC_CHAT_REQUESTS: &str = "chat_requests_total";
/// Failed chat completion requests counter metric name.
pub const METRIC_CHAT_FAILURES: &str = "chat_failures_total";
/// Chat completion latency metric name.
pub const METRIC_CHAT_LATENCY: &str = "chat_latency_ms";
/// Token requests counter metric name.
pub const METRIC_TOKEN_REQUESTS: &str = "token_requests_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_CHAT_LATENCY,
        "Time until the inference endpoint answered, in milliseconds"
    );

    describe_counter!(METRIC_CHAT_REQUESTS, "Total number of chat completion requests");
    describe_counter!(
        METRIC_CHAT_FAILURES,
        "Total number of chat completion requests that failed"
    );
    describe_counter!(
        METRIC_TOKEN_REQUESTS,
        "Total number of access tokens requested from the identity provider"
    );

    debug!("Metrics initialized");
}

/// Install the Prometheus recorder and describe all metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    init_metrics();
    Ok(handle)
}

/// Record one chat completion request.
pub fn record_chat_request(start: Instant, success: bool) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_CHAT_LATENCY).record(latency_ms);
    counter!(METRIC_CHAT_REQUESTS).increment(1);
    if !success {
        counter!(METRIC_CHAT_FAILURES).increment(1);
    }
}

/// Record a token request that missed the cache.
pub fn record_token_request(kind: CredentialKind) {
    counter!(METRIC_TOKEN_REQUESTS, "credential" => kind.to_string()).increment(1);
}
