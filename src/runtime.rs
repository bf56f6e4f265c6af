//! Wires configuration into the running decision and execution core.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::callback::CallbackCorrelator;
use crate::config::{AccountConfig, AppConfig};
use crate::connection::{Connection, ConnectionManager};
use crate::coordination::{GracefulShutdown, ShutdownConfig, ShutdownReport};
use crate::dispatch::Dispatcher;
use crate::ensemble::EnsembleEngine;
use crate::error::{Result, TradegateError};
use crate::pipeline::DecisionPipeline;
use crate::risk::{AccountBook, RiskGate};
use crate::selector::{AgentSelector, PerformanceBook};
use crate::services::{self, health, webhook, HealthState, Metrics, WebhookState};
use crate::transport::{InboundEvent, Transport};

pub struct TradeGate {
    config: AppConfig,
    pub metrics: Arc<Metrics>,
    pub accounts: Arc<AccountBook>,
    pub selector: Arc<AgentSelector>,
    pub connections: Arc<ConnectionManager>,
    pub dispatcher: Dispatcher,
    pub correlator: Arc<CallbackCorrelator>,
    pub pipeline: Arc<DecisionPipeline>,
    pub shutdown: Arc<GracefulShutdown>,
    inbound_tx: mpsc::Sender<InboundEvent>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TradeGate {
    /// Validate the configuration and load the policy models.
    pub fn build(config: AppConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| TradegateError::InvalidConfig(errors.join("; ")))?;
        let engine = EnsembleEngine::from_models(&config.models, config.ensemble.clone())?;
        Ok(Self::with_engine(config, engine))
    }

    /// Assemble around an already-built engine.
    pub fn with_engine(config: AppConfig, engine: EnsembleEngine) -> Self {
        let metrics = Arc::new(Metrics::new());
        let accounts = Arc::new(AccountBook::new());
        let book = Arc::new(PerformanceBook::new(config.selector.performance_window));
        let selector = Arc::new(AgentSelector::new(config.selector.clone(), book));

        let (inbound_tx, inbound_rx) = mpsc::channel(config.connector.callback_queue_size);
        let connections = Arc::new(ConnectionManager::new(
            config.connector.clone(),
            inbound_tx.clone(),
            Arc::clone(&metrics),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(connections.registry()),
            RiskGate::new(config.risk.clone()),
            Arc::clone(&accounts),
            Arc::clone(&metrics),
            config.connector.clone(),
        );
        let correlator = Arc::new(
            CallbackCorrelator::new(
                Arc::clone(dispatcher.pending()),
                Arc::clone(&selector),
                Arc::clone(&accounts),
                Arc::clone(&metrics),
            )
            .with_connections(Arc::clone(&connections))
            .with_attribution_ttl(Duration::from_secs(config.connector.attribution_ttl_secs)),
        );
        let pipeline = Arc::new(DecisionPipeline::new(
            &config,
            Arc::new(engine),
            Arc::clone(&selector),
            dispatcher.clone(),
            Arc::clone(&metrics),
        ));
        let shutdown = Arc::new(GracefulShutdown::new(ShutdownConfig {
            drain_timeout: Duration::from_millis(config.connector.command_timeout_ms),
            ..ShutdownConfig::default()
        }));

        Self {
            config,
            metrics,
            accounts,
            selector,
            connections,
            dispatcher,
            correlator,
            pipeline,
            shutdown,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Sender the webhook receiver and in-process agents feed inbound events into
    pub fn inbound(&self) -> mpsc::Sender<InboundEvent> {
        self.inbound_tx.clone()
    }

    /// Start background tasks, then connect every enabled account. Accounts
    /// whose first handshake fails keep retrying in the background.
    pub async fn start(&self) -> Result<()> {
        self.spawn_background()?;

        for account in self.config.accounts.iter().filter(|a| a.enabled) {
            if let Err(e) = self.connect_account(account).await {
                warn!(account = %account.account_id, error = %e, "account not connected at startup");
            }
        }
        Ok(())
    }

    pub async fn connect_account(&self, account: &AccountConfig) -> Result<Connection> {
        self.connections.initialize_connection(account).await
    }

    /// Register a caller-built transport for `account_id`.
    pub async fn attach_transport(&self, account_id: &str, transport: Arc<dyn Transport>) -> Result<Connection> {
        self.connections
            .initialize_with_transport(account_id, transport)
            .await
    }

    /// Correlator, metrics reporter, and HTTP endpoints.
    pub fn spawn_background(&self) -> Result<()> {
        let Some(rx) = self.inbound_rx.lock().ok().and_then(|mut slot| slot.take()) else {
            return Err(TradegateError::Internal("background tasks already started".to_string()));
        };
        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(Arc::clone(&self.correlator).run(rx)));

        if self.config.connector.enable_metrics {
            tasks.push(self.metrics.spawn_reporter(
                Duration::from_millis(self.config.connector.metrics_interval_ms),
                self.shutdown.stop_signal(),
            ));
        }

        if self.config.webhook.enabled {
            let addr: SocketAddr = self.config.webhook.bind.parse().map_err(|e| {
                TradegateError::InvalidConfig(format!("webhook.bind {}: {e}", self.config.webhook.bind))
            })?;
            let stop = self.shutdown.stop_signal();
            let app = self.router();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = services::serve(addr, app, stop).await {
                    warn!(error = %e, "HTTP server stopped");
                }
            }));
        }

        if let Ok(mut slot) = self.tasks.lock() {
            slot.extend(tasks);
        }
        Ok(())
    }

    /// `/health`, `/healthz`, `/metrics` and `/webhook`
    pub fn router(&self) -> Router {
        let health_state = Arc::new(
            HealthState::new(Arc::clone(self.connections.registry()), Arc::clone(&self.metrics))
                .with_dispatcher(self.dispatcher.clone()),
        );
        let webhook_state = Arc::new(WebhookState::new(
            self.config.webhook.secret.clone(),
            self.inbound_tx.clone(),
        ));
        health::routes(health_state).merge(webhook::routes(webhook_state))
    }

    /// Phased shutdown, then stop background tasks.
    pub async fn stop(&self) -> ShutdownReport {
        let report = self
            .shutdown
            .execute(&self.dispatcher, &self.connections)
            .await;
        let tasks = self
            .tasks
            .lock()
            .map(|mut t| std::mem::take(&mut *t))
            .unwrap_or_default();
        for task in tasks {
            task.abort();
        }
        info!(drained = report.drained, cancelled = report.cancelled, "runtime stopped");
        report
    }
}
