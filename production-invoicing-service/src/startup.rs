//! Application startup and lifecycle management.

use crate::config::ProductionInvoicingConfig;
use crate::grpc::{
    proto::{
        production_invoicing_service_server::ProductionInvoicingServiceServer, FILE_DESCRIPTOR_SET,
    },
    trace_context_interceptor, ProductionInvoicingServiceImpl,
};
use crate::services::accounting::{
    AccountingClient, HttpAccountingClient, SyncAdapter, SyncJob, SyncQueue, SyncWorker,
};
use crate::services::{get_metrics, init_metrics, InvoiceRepository, InvoiceService, PgRepository};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as GrpcServer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    repo: Arc<dyn InvoiceRepository>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.repo.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "production-invoicing-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "production-invoicing-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.repo.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    repo: Arc<PgRepository>,
    invoices: InvoiceService,
    sync_worker: SyncWorker,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ProductionInvoicingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(
        config: ProductionInvoicingConfig,
    ) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: ProductionInvoicingConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let repo = PgRepository::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            repo.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let repo = Arc::new(repo);

        let accounting_client: Option<Arc<dyn AccountingClient>> = if config.accounting.is_enabled()
        {
            let client = HttpAccountingClient::new(
                &config.accounting.api_url,
                config.accounting.timeout,
                config.accounting.max_retry,
            )
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to build accounting client: {}", e))
            })?;
            tracing::info!(endpoint = %config.accounting.api_url, "Accounting sync enabled");
            Some(Arc::new(client))
        } else {
            tracing::info!("Accounting API URL not configured - sync jobs will be skipped");
            None
        };

        let shutdown = CancellationToken::new();
        let (queue, rx): (SyncQueue, mpsc::Receiver<SyncJob>) =
            SyncQueue::channel(config.accounting.queue_size);
        let adapter = Arc::new(SyncAdapter::new(repo.clone(), accounting_client));
        let sync_worker = SyncWorker::new(adapter, rx, shutdown.clone());
        let invoices = InvoiceService::new(repo.clone(), queue);

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.common.grpc_port()));
        let grpc_listener = TcpListener::bind(grpc_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %grpc_addr, "Failed to bind gRPC listener");
            AppError::from(e)
        })?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            grpc_port = grpc_port,
            "Production invoicing service listeners bound"
        );

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            repo,
            invoices,
            sync_worker,
            shutdown,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get the gRPC port the server is listening on.
    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    /// Get a reference to the repository.
    pub fn repository(&self) -> &PgRepository {
        &self.repo
    }

    /// Cancelling this token stops the accounting sync worker.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            repo: self.repo.clone(),
        };

        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(health_state);

        let invoicing_service = ProductionInvoicingServiceImpl::new(self.invoices);

        let (mut health_reporter, grpc_health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<ProductionInvoicingServiceServer<ProductionInvoicingServiceImpl>>()
            .await;

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| {
                std::io::Error::other(format!("Failed to build reflection service: {}", e))
            })?;

        let grpc_trace_layer = TraceLayer::new_for_grpc()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));

        let invoicing_service_with_interceptor = ProductionInvoicingServiceServer::with_interceptor(
            invoicing_service,
            trace_context_interceptor,
        );

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = GrpcServer::builder()
            .layer(grpc_trace_layer)
            .add_service(grpc_health_service)
            .add_service(reflection_service)
            .add_service(invoicing_service_with_interceptor)
            .serve_with_incoming(incoming);

        let shutdown = self.shutdown.clone();
        let worker = self.sync_worker.spawn();

        tracing::info!(
            service = "production-invoicing-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            grpc_port = self.grpc_port,
            "Service ready to accept connections"
        );

        let result = tokio::select! {
            result = axum::serve(self.http_listener, http_router) => {
                result.map_err(|e| {
                    tracing::error!(error = %e, "HTTP server error");
                    std::io::Error::other(format!("HTTP server error: {}", e))
                })
            }
            result = grpc_server => {
                result.map_err(|e| {
                    tracing::error!(error = %e, "gRPC server error");
                    std::io::Error::other(format!("gRPC server error: {}", e))
                })
            }
        };

        shutdown.cancel();
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "Sync worker task failed");
        }

        result
    }
}
