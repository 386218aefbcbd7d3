//! Prometheus metrics for production-invoicing-service.
//!
//! Domain metrics live in the default `prometheus` registry. HTTP request
//! metrics come from the shared axum middleware through the `metrics` facade
//! and are exported by a `metrics-exporter-prometheus` recorder. `/metrics`
//! serves both.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// gRPC request counter by method and status.
pub static GRPC_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "production_invoicing_grpc_requests_total",
        "Total number of gRPC requests",
        &["method", "status"]
    )
    .expect("Failed to register grpc_requests_total")
});

/// gRPC request duration histogram by method.
pub static GRPC_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "production_invoicing_grpc_request_duration_seconds",
        "gRPC request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register grpc_request_duration")
});

/// Invoices created by type.
pub static INVOICES_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "production_invoicing_invoices_created_total",
        "Total number of invoices created by type",
        &["invoice_type"] // deposit, final
    )
    .expect("Failed to register invoices_created_total")
});

/// Manual status changes and cancellations.
pub static INVOICE_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "production_invoicing_invoice_transitions_total",
        "Invoice status transitions outside payment recording",
        &["from", "to"]
    )
    .expect("Failed to register invoice_transitions_total")
});

/// Payments recorded by method.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "production_invoicing_payments_total",
        "Total number of payments by payment method",
        &["payment_method"]
    )
    .expect("Failed to register payments_total")
});

/// Payment amount by method.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "production_invoicing_payment_amount_total",
        "Total payment amount by payment method",
        &["payment_method"]
    )
    .expect("Failed to register payment_amount_total")
});

/// Production side effects of paid invoices.
pub static SIDE_EFFECTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "production_invoicing_side_effects_total",
        "Production order updates and units created when invoices are paid",
        &["invoice_type", "effect"] // orders_settled, units_created
    )
    .expect("Failed to register side_effects_total")
});

/// Accounting sync outcomes.
pub static SYNC_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "production_invoicing_sync_total",
        "Accounting sync attempts by entity and outcome",
        &["entity_type", "outcome"] // synced, already_mapped, skipped, failed, dropped, refreshed
    )
    .expect("Failed to register sync_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "production_invoicing_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "production_invoicing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Handle of the recorder behind the `metrics` facade. `None` when another
/// recorder was installed first.
static HTTP_METRICS: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

fn install_http_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "HTTP metrics recorder not installed");
            None
        }
    }
}

/// Initialize all metrics (forces lazy initialization) and install the
/// HTTP metrics recorder. Safe to call more than once.
pub fn init_metrics() {
    HTTP_METRICS.get_or_init(install_http_recorder);
    Lazy::force(&GRPC_REQUESTS_TOTAL);
    Lazy::force(&GRPC_REQUEST_DURATION);
    Lazy::force(&INVOICES_CREATED_TOTAL);
    Lazy::force(&INVOICE_TRANSITIONS_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
    Lazy::force(&SIDE_EFFECTS_TOTAL);
    Lazy::force(&SYNC_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut body = encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default();
    if let Some(handle) = HTTP_METRICS.get().and_then(Option::as_ref) {
        body.push_str(&handle.render());
    }
    body
}
