//! Observability server (C16): `/health`, `/status`, `/metrics` behind an
//! axum router, served via `axum::serve` over a `TcpListener` with
//! graceful shutdown tied to the process-wide shutdown signal.

use std::net::TcpListener;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use hyper::header::CONTENT_TYPE;
use hyper::StatusCode;
use prometheus::{Encoder, TextEncoder};
use tracing::info;

use crate::config::ServerConfig;
use crate::orchestrator::Orchestrator;
use crate::stats::StatsSnapshot;

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> StatusCode {
    if orchestrator.is_standby() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

#[derive(serde::Serialize)]
struct StatusResponse {
    standby: bool,
    stats: StatsSnapshot,
}

async fn status(State(orchestrator): State<Arc<Orchestrator>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        standby: orchestrator.is_standby(),
        stats: orchestrator.stats().snapshot(),
    })
}

async fn metrics() -> Result<Response<Body>, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Response::builder()
        .status(200)
        .header(CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// # Errors
///
/// Returns `Err` if the configured address cannot be bound or the server
/// fails while serving.
pub async fn run(orchestrator: Arc<Orchestrator>, config: ServerConfig) -> anyhow::Result<()> {
    info!(address = %config.address, "will listen");
    let listener = TcpListener::bind(config.address)?;
    bind_from_listener(orchestrator, listener).await
}

async fn bind_from_listener(orchestrator: Arc<Orchestrator>, listener: TcpListener) -> anyhow::Result<()> {
    listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;

    let router = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(orchestrator);

    axum::serve(listener, router)
        .with_graceful_shutdown(crate::shutdown::await_shutdown())
        .await?;

    Ok(())
}
