//! Connection manager: one worker per account owns heartbeats and
//! reconnects, so the two never race for the same transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::registry::{unknown_account, ConnectionRegistry, ConnectionSlot};
use super::state::{Connection, ConnectionState, ReconnectPolicy};
use crate::config::{AccountConfig, ConnectorConfig};
use crate::error::{Result, TradegateError};
use crate::services::Metrics;
use crate::transport::{self, HeartbeatInfo, InboundEvent, Transport, TransportContext, TransportKind};

const WORKER_JOIN_GRACE: Duration = Duration::from_secs(2);

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ConnectionManager {
    registry: Arc<ConnectionRegistry>,
    connector: ConnectorConfig,
    inbound: mpsc::Sender<InboundEvent>,
    metrics: Arc<Metrics>,
    workers: Mutex<HashMap<String, Worker>>,
}

impl ConnectionManager {
    pub fn new(
        connector: ConnectorConfig,
        inbound: mpsc::Sender<InboundEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            connector,
            inbound,
            metrics,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.registry.all()
    }

    /// Build the configured transport, handshake, and start its worker.
    pub async fn initialize_connection(&self, account: &AccountConfig) -> Result<Connection> {
        let transport = transport::build(account, &self.connector)?;
        self.initialize_with_transport(&account.account_id, transport).await
    }

    /// Register `transport` for `account_id` and perform the first handshake.
    ///
    /// A failed handshake is returned to the caller, but the worker is still
    /// started in `Reconnecting` so the account recovers on its own.
    pub async fn initialize_with_transport(
        &self,
        account_id: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Connection> {
        if self.registry.contains(account_id) {
            return Err(TradegateError::Validation(format!(
                "connection for {account_id} already initialized"
            )));
        }

        let connection = Connection::new(
            account_id,
            transport.kind(),
            transport.endpoint(),
            self.connector.max_retries,
        );
        let slot = self.registry.insert(connection, Arc::clone(&transport));

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut worker = ConnectionWorker {
            account_id: account_id.to_string(),
            slot: Arc::clone(&slot),
            transport,
            inbound: self.inbound.clone(),
            link_lost: Arc::new(Notify::new()),
            heartbeat_interval: Duration::from_millis(self.connector.heartbeat_interval_ms),
            handshake_timeout: self.handshake_timeout(slot.snapshot().transport),
            policy: ReconnectPolicy::new(
                Duration::from_millis(self.connector.retry_delay_ms),
                self.connector.max_retries,
            ),
            metrics: Arc::clone(&self.metrics),
            stop: stop_rx,
        };

        slot.transition(ConnectionState::Connecting, |_| {})?;
        let outcome = worker.handshake().await;
        match &outcome {
            Ok(()) => {
                slot.transition(ConnectionState::Connected, |c| {
                    c.last_heartbeat = Some(Utc::now());
                    c.retry_count = 0;
                    c.last_error = None;
                })?;
                info!(account = %account_id, endpoint = %slot.snapshot().endpoint, "connection established");
            }
            Err(e) => {
                let reason = e.to_string();
                slot.transition(ConnectionState::Reconnecting, |c| c.last_error = Some(reason))?;
                warn!(account = %account_id, error = %e, "initial handshake failed; retrying in background");
            }
        }

        let handle = tokio::spawn(worker.run());
        if let Ok(mut workers) = self.workers.lock() {
            workers.insert(account_id.to_string(), Worker { stop: stop_tx, handle });
        }

        outcome.map(|_| slot.snapshot())
    }

    /// Heartbeat reported by the agent itself (push or webhook).
    pub fn record_heartbeat(&self, account_id: &str, info: &HeartbeatInfo) {
        if let Some(slot) = self.registry.slot(account_id) {
            if slot.snapshot().is_connected() {
                slot.update(|c| c.last_heartbeat = Some(Utc::now()));
                debug!(account = %account_id, broker = ?info.broker, "agent heartbeat");
            }
        }
    }

    /// Stop the worker, close the transport, and leave the slot Disconnected.
    pub async fn close_connection(&self, account_id: &str) -> Result<()> {
        let slot = self
            .registry
            .slot(account_id)
            .ok_or_else(|| unknown_account(account_id))?;

        let worker = self.workers.lock().ok().and_then(|mut w| w.remove(account_id));
        if let Some(worker) = worker {
            let _ = worker.stop.send(true);
            let abort = worker.handle.abort_handle();
            if timeout(WORKER_JOIN_GRACE, worker.handle).await.is_err() {
                abort.abort();
            }
        }

        if let Err(e) = slot.transport.close().await {
            warn!(account = %account_id, error = %e, "transport close failed");
        }
        if !slot.snapshot().state.is_terminal() && slot.snapshot().state != ConnectionState::Disconnected {
            slot.transition(ConnectionState::Disconnected, |_| {})?;
        }
        info!(account = %account_id, "connection closed");
        Ok(())
    }

    pub async fn close_all(&self) {
        for connection in self.registry.all() {
            if let Err(e) = self.close_connection(&connection.account_id).await {
                warn!(account = %connection.account_id, error = %e, "close failed");
            }
        }
    }

    fn handshake_timeout(&self, kind: TransportKind) -> Duration {
        Duration::from_millis(match kind {
            TransportKind::Http => self.connector.http_timeout_ms,
            TransportKind::WebSocket => self.connector.ws_timeout_ms,
        })
    }
}

enum Step {
    Continue,
    Stop,
}

enum LinkEvent {
    Tick,
    Lost,
    Stop,
}

struct ConnectionWorker {
    account_id: String,
    slot: Arc<ConnectionSlot>,
    transport: Arc<dyn Transport>,
    inbound: mpsc::Sender<InboundEvent>,
    /// Replaced on every handshake so a stale signal cannot hit a fresh session
    link_lost: Arc<Notify>,
    heartbeat_interval: Duration,
    handshake_timeout: Duration,
    policy: ReconnectPolicy,
    metrics: Arc<Metrics>,
    stop: watch::Receiver<bool>,
}

impl ConnectionWorker {
    async fn run(mut self) {
        loop {
            let step = match self.slot.snapshot().state {
                ConnectionState::Connected => self.watch_link().await,
                ConnectionState::Reconnecting => self.reconnect().await,
                _ => Step::Stop,
            };
            if let Step::Stop = step {
                break;
            }
        }
        debug!(account = %self.account_id, "connection worker stopped");
    }

    async fn handshake(&mut self) -> Result<()> {
        self.link_lost = Arc::new(Notify::new());
        let ctx = TransportContext {
            account_id: self.account_id.clone(),
            inbound: self.inbound.clone(),
            link_lost: Arc::clone(&self.link_lost),
        };
        timeout(self.handshake_timeout, self.transport.connect(ctx))
            .await
            .map_err(|_| {
                TradegateError::TransportTimeout(format!(
                    "handshake with {} exceeded {:?}",
                    self.account_id, self.handshake_timeout
                ))
            })?
    }

    async fn watch_link(&mut self) -> Step {
        let mut ticker = interval_at(Instant::now() + self.heartbeat_interval, self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let link_lost = Arc::clone(&self.link_lost);

        loop {
            let event = tokio::select! {
                _ = ticker.tick() => LinkEvent::Tick,
                _ = link_lost.notified() => LinkEvent::Lost,
                _ = stopped(&mut self.stop) => LinkEvent::Stop,
            };

            match event {
                LinkEvent::Stop => return Step::Stop,
                LinkEvent::Lost => return self.lose("transport reported link loss".to_string()),
                LinkEvent::Tick => {
                    match timeout(self.handshake_timeout, self.transport.heartbeat()).await {
                        Ok(Ok(info)) => {
                            self.slot.update(|c| c.last_heartbeat = Some(Utc::now()));
                            debug!(account = %self.account_id, version = ?info.agent_version, "heartbeat ok");
                        }
                        Ok(Err(e)) => {
                            Metrics::inc(&self.metrics.heartbeat_failures);
                            return self.lose(format!("heartbeat failed: {e}"));
                        }
                        Err(_) => {
                            Metrics::inc(&self.metrics.heartbeat_failures);
                            return self.lose(format!(
                                "heartbeat exceeded {:?}",
                                self.handshake_timeout
                            ));
                        }
                    }
                }
            }
        }
    }

    fn lose(&self, reason: String) -> Step {
        warn!(account = %self.account_id, reason = %reason, "connection lost");
        match self
            .slot
            .transition(ConnectionState::Reconnecting, |c| c.last_error = Some(reason))
        {
            Ok(()) => Step::Continue,
            Err(_) => Step::Stop,
        }
    }

    async fn reconnect(&mut self) -> Step {
        let attempt = self.slot.snapshot().retry_count;
        let Some(delay) = self.policy.next_delay(attempt) else {
            let _ = self.slot.transition(ConnectionState::Error, |c| {
                c.last_error = Some(format!("gave up after {attempt} reconnect attempts"));
            });
            error!(account = %self.account_id, attempts = attempt, "reconnect retries exhausted");
            return Step::Stop;
        };

        self.slot.update(|c| c.retry_count = attempt + 1);
        info!(
            account = %self.account_id,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let stop_requested = tokio::select! {
            _ = sleep(delay) => false,
            _ = stopped(&mut self.stop) => true,
        };
        if stop_requested {
            return Step::Stop;
        }

        if self.slot.transition(ConnectionState::Connecting, |_| {}).is_err() {
            return Step::Stop;
        }

        match self.handshake().await {
            Ok(()) => {
                let moved = self.slot.transition(ConnectionState::Connected, |c| {
                    c.retry_count = 0;
                    c.last_heartbeat = Some(Utc::now());
                    c.last_error = None;
                });
                if moved.is_err() {
                    return Step::Stop;
                }
                Metrics::inc(&self.metrics.reconnects);
                info!(account = %self.account_id, "reconnected");
                Step::Continue
            }
            Err(e) => {
                warn!(account = %self.account_id, error = %e, "reconnect attempt failed");
                let reason = e.to_string();
                match self
                    .slot
                    .transition(ConnectionState::Reconnecting, |c| c.last_error = Some(reason))
                {
                    Ok(()) => Step::Continue,
                    Err(_) => Step::Stop,
                }
            }
        }
    }
}

/// Resolves once the stop flag is raised or its sender is gone.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
