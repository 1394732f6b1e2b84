//! Metrics for chat-completion requests
//!
//! Recorded through the `metrics` facade; nothing is exported unless a
//! recorder is installed (see [`init_metrics_exporter`]).
//!
//! # Metrics
//!
//! - `chat_requests_total`: Counter of logical requests, by endpoint
//! - `chat_request_retries_total`: Counter of extra attempts, by reason
//! - `chat_request_failures_total`: Counter of surfaced failures, by kind
//! - `chat_request_duration_seconds`: Histogram of request duration
//!
//! # Examples
//!
//! ```
//! use chatroom::client::metrics::RequestMetrics;
//!
//! let metrics = RequestMetrics::new("direct");
//! metrics.record_retry("rate_limit");
//! metrics.record_success(2);
//! ```

use metrics::{histogram, increment_counter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Metrics for one logical chat request (all of its attempts)
#[derive(Debug)]
pub struct RequestMetrics {
    endpoint: &'static str,
    start: Instant,
    recorded: AtomicBool,
}

impl RequestMetrics {
    /// Start tracking a request against `endpoint` (`direct` or `proxy`)
    pub fn new(endpoint: &'static str) -> Self {
        increment_counter!("chat_requests_total", "endpoint" => endpoint);
        Self {
            endpoint,
            start: Instant::now(),
            recorded: AtomicBool::new(false),
        }
    }

    /// Record that another attempt will be made
    pub fn record_retry(&self, reason: &'static str) {
        increment_counter!(
            "chat_request_retries_total",
            "endpoint" => self.endpoint,
            "reason" => reason
        );
    }

    /// Record a successful completion after `attempts` attempts
    pub fn record_success(&self, attempts: u32) {
        if self.recorded.swap(true, Ordering::SeqCst) {
            return;
        }
        histogram!(
            "chat_request_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "endpoint" => self.endpoint,
            "status" => "success",
            "attempts" => attempts.to_string()
        );
    }

    /// Record a surfaced failure of the given kind
    pub fn record_failure(&self, kind: &'static str) {
        if self.recorded.swap(true, Ordering::SeqCst) {
            return;
        }
        increment_counter!(
            "chat_request_failures_total",
            "endpoint" => self.endpoint,
            "kind" => kind
        );
        histogram!(
            "chat_request_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "endpoint" => self.endpoint,
            "status" => "failure"
        );
    }

    /// Whether a final outcome has been recorded
    pub fn is_recorded(&self) -> bool {
        self.recorded.load(Ordering::SeqCst)
    }
}

/// Install the Prometheus exporter
///
/// Only has an effect when built with the `prometheus` feature; otherwise
/// the metrics above go nowhere.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        if let Err(e) = PrometheusBuilder::new().install() {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        }
    }
}
