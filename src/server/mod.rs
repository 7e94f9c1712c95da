mod error;
mod grades;
mod health;
mod middleware;

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use eyre::WrapErr;
use tokio::signal;
use tower::ServiceBuilder;

use crate::{db::Database, logging::BatchLogger, metrics::Metrics};

pub use error::ApiError;
pub use health::HEALTH_PATH;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState<D: Database> {
    pub db: D,
    pub logger: Arc<BatchLogger>,
    pub metrics: Metrics,
}

impl<D: Database> AppState<D> {
    pub fn new(db: D, logger: Arc<BatchLogger>, metrics: Metrics) -> Self {
        Self {
            db,
            logger,
            metrics,
        }
    }
}

pub fn router<D: Database>(state: AppState<D>) -> Router {
    let middleware = ServiceBuilder::new().layer(from_fn_with_state(
        state.logger.clone(),
        middleware::log_requests,
    ));

    Router::new()
        .route(HEALTH_PATH, get(health::health::<D>))
        .route(
            "/api/v1/grades",
            get(grades::list_grades::<D>).post(grades::create_grade::<D>),
        )
        .route("/api/v1/grades/avg", get(grades::average_grade::<D>))
        .route(
            "/api/v1/grades/{id}",
            get(grades::get_grade::<D>)
                .put(grades::update_grade::<D>)
                .delete(grades::delete_grade::<D>),
        )
        .layer(middleware)
        .with_state(state)
}

/// Serves `app` on `port` until SIGINT or SIGTERM.
pub async fn serve(app: Router, port: u16) -> eyre::Result<()> {
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .wrap_err_with(|| format!("Failed to bind to address {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
