//! Prometheus metrics for entitlement-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

/// Renders the HTTP metrics recorded by `service_core` middleware.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Profile views by outcome: charged, repeat, quota_exceeded, self_view, error.
pub static VIEWS_RECORDED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "entitlement_views_recorded_total",
        "Profile view attempts by outcome",
        &["outcome"]
    )
    .expect("Failed to register views_recorded_total")
});

/// Payment lifecycle events by status.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "entitlement_payments_total",
        "Payment lifecycle events by status",
        &["status"]
    )
    .expect("Failed to register payments_total")
});

pub static ENTITLEMENT_ADJUSTMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "entitlement_adjustments_total",
        "Applied views_limit adjustments by source",
        &["source"]
    )
    .expect("Failed to register adjustments_total")
});

pub static REFUND_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "entitlement_refund_decisions_total",
        "Refund decisions by outcome",
        &["decision"]
    )
    .expect("Failed to register refund_decisions_total")
});

pub static PROMO_REDEMPTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "entitlement_promo_redemptions_total",
        "Promo code uses by result: reserved, released or the rejection reason",
        &["result"]
    )
    .expect("Failed to register promo_redemptions_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "entitlement_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "entitlement_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder already installed, using detached handle");
            PrometheusBuilder::new().build_recorder().handle()
        }
    });

    Lazy::force(&VIEWS_RECORDED_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&ENTITLEMENT_ADJUSTMENTS_TOTAL);
    Lazy::force(&REFUND_DECISIONS_TOTAL);
    Lazy::force(&PROMO_REDEMPTIONS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

pub fn record_error(error: &crate::error::EntitlementError) {
    ERRORS_TOTAL.with_label_values(&[error.code()]).inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    output.push_str(&encoder.encode_to_string(&metric_families).unwrap_or_default());
    output
}
