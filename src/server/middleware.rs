use std::{sync::Arc, time::Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::logging::{BatchLogger, LogEntry};

use super::health::HEALTH_PATH;

/// Logs every request locally and ships an access entry through the batch
/// logger. Health probes are skipped.
pub async fn log_requests(
    State(logger): State<Arc<BatchLogger>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if path == HEALTH_PATH {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let latency_ms = started.elapsed().as_millis() as u64;

    let level = if status.is_server_error() {
        tracing::error!(%method, %path, status = status.as_u16(), latency_ms, "request");
        "error"
    } else if status.is_client_error() {
        tracing::warn!(%method, %path, status = status.as_u16(), latency_ms, "request");
        "warn"
    } else {
        tracing::info!(%method, %path, status = status.as_u16(), latency_ms, "request");
        "info"
    };

    let entry = LogEntry::new(format!("{} {}", method, path), level)
        .with_metadata("method", &method)
        .with_metadata("path", &path)
        .with_metadata("status", status.as_u16())
        .with_metadata("latency_ms", latency_ms);
    logger.log(entry).await;

    response
}
