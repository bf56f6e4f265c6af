//! Health and metrics endpoints for process supervision.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::connection::{ConnectionRegistry, ConnectionState};
use crate::dispatch::Dispatcher;
use crate::services::metrics::{Metrics, MetricsSnapshot};

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// One connection's health
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub components: Vec<ComponentHealth>,
    pub pending_commands: usize,
    pub parked_commands: usize,
    pub counters: MetricsSnapshot,
}

/// Shared state for the health routes
pub struct HealthState {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Option<Dispatcher>,
    metrics: Arc<Metrics>,
}

impl HealthState {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<Metrics>) -> Self {
        Self {
            registry,
            dispatcher: None,
            metrics,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    fn pending(&self) -> (usize, usize) {
        self.dispatcher
            .as_ref()
            .map(|d| (d.pending_count(), d.parked_count()))
            .unwrap_or((0, 0))
    }

    /// Healthy when every account is connected, unhealthy when any has given
    /// up, degraded otherwise.
    pub fn get_health(&self) -> HealthResponse {
        let components: Vec<ComponentHealth> = self
            .registry
            .all()
            .into_iter()
            .map(|c| ComponentHealth {
                status: match c.state {
                    ConnectionState::Connected => HealthStatus::Healthy,
                    ConnectionState::Error => HealthStatus::Unhealthy,
                    _ => HealthStatus::Degraded,
                },
                name: c.account_id,
                state: c.state,
                message: c.last_error,
                last_heartbeat: c.last_heartbeat,
                retry_count: c.retry_count,
            })
            .collect();

        let status = if components.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if components.iter().all(|c| c.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        let (pending_commands, parked_commands) = self.pending();
        HealthResponse {
            status,
            timestamp: Utc::now(),
            uptime_seconds: self.metrics.uptime_secs(),
            components,
            pending_commands,
            parked_commands,
            counters: self.metrics.snapshot(),
        }
    }
}

pub fn routes(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health();
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let (pending, _) = state.pending();
    let body = state
        .metrics
        .prometheus(pending, state.registry.connected_count());
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_connections_reads_healthy() {
        let state = HealthState::new(Arc::new(ConnectionRegistry::new()), Arc::new(Metrics::new()));
        let health = state.get_health();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.components.is_empty());
        assert_eq!(health.pending_commands, 0);
    }
}
