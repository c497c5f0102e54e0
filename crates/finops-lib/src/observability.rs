//! Observability of the insights service itself
//!
//! Provides:
//! - Prometheus metrics for refresh cycles, upstream failures and HTTP requests
//! - Structured JSON logging of engine transitions with tracing

use crate::models::{AnomalyResult, Recommendation, RecommendationType};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for refresh cycle duration (in seconds)
const REFRESH_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<FinopsMetricsInner> = OnceLock::new();

struct FinopsMetricsInner {
    refresh_duration_seconds: Histogram,
    refresh_cycles_total: IntCounterVec,
    refresh_skipped_total: IntCounter,
    upstream_errors_total: IntCounterVec,
    carried_forward_total: IntCounterVec,
    http_requests_total: IntCounterVec,
}

impl FinopsMetricsInner {
    fn new() -> Self {
        Self {
            refresh_duration_seconds: register_histogram!(
                "finops_refresh_duration_seconds",
                "Wall time of insight refresh cycles",
                REFRESH_BUCKETS.to_vec()
            )
            .expect("Failed to register refresh_duration_seconds"),

            refresh_cycles_total: register_int_counter_vec!(
                "finops_refresh_cycles_total",
                "Refresh cycles by outcome",
                &["outcome"]
            )
            .expect("Failed to register refresh_cycles_total"),

            refresh_skipped_total: register_int_counter!(
                "finops_refresh_skipped_total",
                "Refresh triggers skipped because a cycle was already running"
            )
            .expect("Failed to register refresh_skipped_total"),

            upstream_errors_total: register_int_counter_vec!(
                "finops_upstream_errors_total",
                "Upstream calls that failed after retries",
                &["upstream"]
            )
            .expect("Failed to register upstream_errors_total"),

            carried_forward_total: register_int_counter_vec!(
                "finops_carried_forward_total",
                "Cycles that reused the previous values of an upstream",
                &["upstream"]
            )
            .expect("Failed to register carried_forward_total"),

            http_requests_total: register_int_counter_vec!(
                "finops_http_requests_total",
                "HTTP requests served",
                &["method", "endpoint", "status"]
            )
            .expect("Failed to register http_requests_total"),
        }
    }
}

/// Service metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct FinopsMetrics {
    _private: (),
}

impl Default for FinopsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FinopsMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(FinopsMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &FinopsMetricsInner {
        GLOBAL_METRICS.get_or_init(FinopsMetricsInner::new)
    }

    pub fn observe_refresh(&self, duration_secs: f64, outcome: &str) {
        self.inner().refresh_duration_seconds.observe(duration_secs);
        self.inner()
            .refresh_cycles_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_refresh_skipped(&self) {
        self.inner().refresh_skipped_total.inc();
    }

    pub fn inc_upstream_error(&self, upstream: &str) {
        self.inner()
            .upstream_errors_total
            .with_label_values(&[upstream])
            .inc();
    }

    pub fn inc_carried_forward(&self, upstream: &str) {
        self.inner()
            .carried_forward_total
            .with_label_values(&[upstream])
            .inc();
    }

    pub fn inc_http_request(&self, method: &str, endpoint: &str, status: u16) {
        self.inner()
            .http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
    }

    pub fn refresh_skipped(&self) -> u64 {
        self.inner().refresh_skipped_total.get()
    }
}

/// Structured logger for engine events
///
/// Every line carries a stable `event` field so log pipelines can key on it.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_startup(&self, version: &str, port: u16) {
        info!(
            event = "service_started",
            cluster = %self.cluster,
            version = %version,
            port = port,
            "FinOps insights service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "FinOps insights service shutting down"
        );
    }

    pub fn log_refresh_completed(
        &self,
        generation: u64,
        duration_ms: u64,
        namespaces: usize,
        recommendations: usize,
        degraded: &[String],
    ) {
        if degraded.is_empty() {
            info!(
                event = "refresh_completed",
                cluster = %self.cluster,
                generation = generation,
                duration_ms = duration_ms,
                namespaces = namespaces,
                recommendations = recommendations,
                "Insight snapshot published"
            );
        } else {
            warn!(
                event = "refresh_completed",
                cluster = %self.cluster,
                generation = generation,
                duration_ms = duration_ms,
                namespaces = namespaces,
                recommendations = recommendations,
                degraded = ?degraded,
                "Insight snapshot published with carried-forward data"
            );
        }
    }

    pub fn log_refresh_skipped(&self, trigger: &str) {
        info!(
            event = "refresh_skipped",
            cluster = %self.cluster,
            trigger = %trigger,
            "Refresh already in progress, trigger skipped"
        );
    }

    pub fn log_refresh_failed(&self, reason: &str) {
        warn!(
            event = "refresh_failed",
            cluster = %self.cluster,
            reason = %reason,
            "Refresh cycle failed, previous snapshot kept"
        );
    }

    pub fn log_anomaly(&self, anomaly: &AnomalyResult, severity: &str) {
        match severity {
            "critical" => {
                warn!(
                    event = "cost_anomaly_detected",
                    cluster = %self.cluster,
                    namespace = %anomaly.namespace,
                    severity = %severity,
                    anomaly_score = anomaly.anomaly_score,
                    observed_cost = anomaly.observed_cost,
                    baseline_cost = anomaly.baseline_cost,
                    increase_percent = anomaly.increase_percent,
                    "Critical cost anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "cost_anomaly_detected",
                    cluster = %self.cluster,
                    namespace = %anomaly.namespace,
                    severity = %severity,
                    anomaly_score = anomaly.anomaly_score,
                    observed_cost = anomaly.observed_cost,
                    baseline_cost = anomaly.baseline_cost,
                    increase_percent = anomaly.increase_percent,
                    "Cost anomaly detected"
                );
            }
        }
    }

    pub fn log_recommendation_opened(&self, recommendation: &Recommendation) {
        info!(
            event = "recommendation_opened",
            cluster = %self.cluster,
            namespace = %recommendation.namespace,
            recommendation_type = %recommendation.recommendation_type,
            estimated_monthly_savings = recommendation.estimated_monthly_savings,
            "Optimization opportunity opened"
        );
    }

    pub fn log_recommendation_resolved(&self, namespace: &str, recommendation_type: RecommendationType) {
        info!(
            event = "recommendation_resolved",
            cluster = %self.cluster,
            namespace = %namespace,
            recommendation_type = %recommendation_type,
            "Optimization opportunity no longer present"
        );
    }
}
