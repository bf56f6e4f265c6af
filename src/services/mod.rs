//! Ambient services: metrics, health endpoints, webhook receiver.

pub mod health;
pub mod metrics;
pub mod webhook;

use std::net::SocketAddr;

use axum::Router;
use tokio::sync::watch;
use tracing::info;

use crate::error::{Result, TradegateError};

pub use health::{HealthResponse, HealthState, HealthStatus};
pub use metrics::{Metrics, MetricsSnapshot};
pub use webhook::WebhookState;

/// Serve `app` on `addr` until `stop` flips to true.
pub async fn serve(addr: SocketAddr, app: Router, mut stop: watch::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*stop.borrow_and_update() {
                if stop.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| TradegateError::Internal(format!("HTTP server error: {e}")))
}
