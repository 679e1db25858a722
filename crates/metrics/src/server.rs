use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::service::MetricsService;

pub fn build_router(metrics: Arc<MetricsService>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<MetricsService>>) -> Result<String, StatusCode> {
    match metrics.get_prometheus_metrics() {
        Ok(text) => Ok(text),
        Err(e) => {
            error!("Failed to get metrics: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn start_server(
    bind: String,
    port: u16,
    metrics: Arc<MetricsService>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(metrics);

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    info!("Metrics server listening on {}:{}", bind, port);

    axum::serve(listener, app).await?;
    Ok(())
}
