//! Metrics exposition tests.

use axum::{middleware, routing::get, Router};
use production_invoicing_service::services::metrics::ERRORS_TOTAL;
use production_invoicing_service::services::{get_metrics, init_metrics};
use service_core::middleware::metrics::metrics_middleware;
use tokio::net::TcpListener;

#[tokio::test]
async fn http_requests_are_exported_alongside_domain_metrics() {
    init_metrics();
    init_metrics();

    let app = Router::new()
        .route("/ping/:id", get(|| async { "pong" }))
        .layer(middleware::from_fn(metrics_middleware));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    for id in ["a", "b"] {
        let response = reqwest::get(format!("http://{}/ping/{}", addr, id))
            .await
            .expect("Request failed");
        assert!(response.status().is_success());
    }

    ERRORS_TOTAL.with_label_values(&["validation_error"]).inc();

    let body = get_metrics();
    let requests = body
        .lines()
        .find(|line| line.starts_with("http_requests_total{") && line.contains("/ping/:id"))
        .unwrap_or_else(|| panic!("http_requests_total missing from:\n{}", body));
    assert!(requests.contains("method=\"GET\""));
    assert!(requests.contains("status=\"200\""));
    assert!(requests.ends_with(" 2"));
    assert!(body.contains("http_request_duration_seconds"));
    assert!(body.contains("production_invoicing_errors_total{error_type=\"validation_error\"}"));
}
