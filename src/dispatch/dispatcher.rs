//! Command dispatcher.
//!
//! `send` runs validation and the risk gate synchronously, registers the
//! pending entry and its deadline, then hands transmission to a task. The
//! returned handle resolves on callback, timeout, or terminal failure.

use std::future::IntoFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{oneshot, Notify};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pending::{DecisionTag, PendingTable};
use super::queue::{CommandQueue, QueuedCommand, Rejected};
use crate::config::ConnectorConfig;
use crate::connection::ConnectionRegistry;
use crate::domain::{CommandAction, CommandResult, ConstraintViolation, TradeCommand};
use crate::error::TradegateError;
use crate::risk::{AccountBook, RiskGate};
use crate::services::Metrics;

/// Awaitable outcome of one `send`
pub struct CommandHandle {
    correlation_id: String,
    state: HandleState,
}

enum HandleState {
    Ready(CommandResult),
    Waiting(oneshot::Receiver<CommandResult>),
}

impl CommandHandle {
    fn ready(result: CommandResult) -> Self {
        Self {
            correlation_id: result.correlation_id.clone(),
            state: HandleState::Ready(result),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// True when `send` already decided the outcome (validation, risk, ...)
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }
}

impl IntoFuture for CommandHandle {
    type Output = CommandResult;
    type IntoFuture = BoxFuture<'static, CommandResult>;

    fn into_future(self) -> Self::IntoFuture {
        let CommandHandle {
            correlation_id,
            state,
        } = self;
        Box::pin(async move {
            match state {
                HandleState::Ready(result) => result,
                HandleState::Waiting(rx) => rx.await.unwrap_or_else(|_| {
                    CommandResult::failure(correlation_id, &TradegateError::Cancelled, 0, 0)
                }),
            }
        })
    }
}

struct ParkingLot {
    queue: Mutex<CommandQueue>,
    wake: Notify,
}

struct DispatchInner {
    registry: Arc<ConnectionRegistry>,
    pending: Arc<PendingTable>,
    risk: RiskGate,
    accounts: Arc<AccountBook>,
    metrics: Arc<Metrics>,
    connector: ConnectorConfig,
    parked: DashMap<String, Arc<ParkingLot>>,
    accepting: AtomicBool,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatchInner>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        risk: RiskGate,
        accounts: Arc<AccountBook>,
        metrics: Arc<Metrics>,
        connector: ConnectorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DispatchInner {
                registry,
                pending: Arc::new(PendingTable::with_accounts(Arc::clone(&accounts))),
                risk,
                accounts,
                metrics,
                connector,
                parked: DashMap::new(),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.inner.pending
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn parked_count(&self) -> usize {
        self.inner
            .parked
            .iter()
            .map(|lot| lot.queue.lock().map(|q| q.len()).unwrap_or(0))
            .sum()
    }

    pub fn send(&self, command: TradeCommand, constraints: &[ConstraintViolation]) -> CommandHandle {
        self.send_tagged(command, constraints, None)
    }

    /// `send` with the decision that produced the command, so the eventual
    /// position outcome can be credited to the right policy and regime.
    pub fn send_tagged(
        &self,
        mut command: TradeCommand,
        constraints: &[ConstraintViolation],
        tag: Option<DecisionTag>,
    ) -> CommandHandle {
        let inner = &self.inner;
        if command.correlation_id.is_empty() {
            command.correlation_id = Uuid::new_v4().to_string();
        }
        let id = command.correlation_id.clone();

        if !inner.accepting.load(Ordering::SeqCst) {
            return inner.reject(&id, TradegateError::Cancelled);
        }

        if let Err(errors) = command.validate() {
            return inner.reject(&id, TradegateError::Validation(errors.join("; ")));
        }

        let assessment = inner.risk.admit(&command, constraints, &inner.accounts);
        if !assessment.should_execute {
            Metrics::inc(&inner.metrics.risk_rejections);
            warn!(
                correlation_id = %id,
                account = %command.account_id,
                reasons = %assessment.summary(),
                "command rejected by risk gate"
            );
            return CommandHandle::ready(CommandResult::failure(
                &id,
                &TradegateError::RiskRejection(assessment.summary()),
                0,
                0,
            ));
        }
        let reserved = (command.action != CommandAction::Close).then_some(command.lot_size);
        let unroutable = |err: TradegateError| {
            if let Some(lots) = reserved {
                inner.accounts.release(&command.account_id, lots);
            }
            inner.reject(&id, err)
        };

        match inner.registry.state(&command.account_id) {
            None => {
                return unroutable(TradegateError::Connection(format!(
                    "unknown account {}",
                    command.account_id
                )))
            }
            Some(state) if state.is_terminal() => {
                return unroutable(TradegateError::Connection(format!(
                    "account {} connection is in {state} state",
                    command.account_id
                )))
            }
            Some(_) => {}
        }

        let rx = match inner.pending.register_reserved(&command, tag, reserved) {
            Ok(rx) => rx,
            Err(e) => return unroutable(e),
        };

        let timeout = Duration::from_millis(command.timeout_ms);
        let metrics = Arc::clone(&inner.metrics);
        inner.pending.arm_timeout(&id, timeout, move |_| Metrics::inc(&metrics.timed_out));

        info!(
            correlation_id = %id,
            account = %command.account_id,
            symbol = %command.symbol,
            action = %command.action,
            lot = %command.lot_size,
            "dispatching command"
        );

        let item = QueuedCommand::new(command, 0, Instant::now() + timeout);
        tokio::spawn(deliver(Arc::clone(&self.inner), item));

        CommandHandle {
            correlation_id: id,
            state: HandleState::Waiting(rx),
        }
    }

    /// Refuse new commands from now on.
    pub fn stop_accepting(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
    }

    /// Wait until nothing is pending or `within` elapses; true when drained.
    pub async fn drain(&self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while !self.inner.pending.is_empty() {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// Fail every pending and parked command with `Cancelled`.
    pub fn cancel_all(&self) -> usize {
        for lot in self.inner.parked.iter() {
            if let Ok(mut q) = lot.queue.lock() {
                q.drain();
            }
        }
        let cancelled = self.inner.pending.fail_all(&TradegateError::Cancelled);
        if cancelled > 0 {
            warn!(cancelled, "cancelled in-flight commands");
        }
        cancelled
    }
}

impl DispatchInner {
    fn reject(&self, correlation_id: &str, err: TradegateError) -> CommandHandle {
        Metrics::inc(&self.metrics.failed);
        warn!(correlation_id = %correlation_id, code = err.code(), error = %err, "command rejected");
        CommandHandle::ready(CommandResult::failure(correlation_id, &err, 0, 0))
    }

    fn fail(&self, correlation_id: &str, err: &TradegateError) {
        if self.pending.fail(correlation_id, err).is_some() {
            Metrics::inc(&self.metrics.failed);
            warn!(correlation_id = %correlation_id, code = err.code(), error = %err, "command failed");
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        Duration::from_millis(self.connector.retry_delay_ms)
            .saturating_mul(2u32.saturating_pow(exp))
    }

    fn park(self: &Arc<Self>, item: QueuedCommand) {
        let account = item.command.account_id.clone();
        let lot = self
            .parked
            .entry(account.clone())
            .or_insert_with(|| {
                let lot = Arc::new(ParkingLot {
                    queue: Mutex::new(CommandQueue::new(self.connector.command_queue_size)),
                    wake: Notify::new(),
                });
                tokio::spawn(flush_parked(Arc::clone(self), account.clone(), Arc::clone(&lot)));
                lot
            })
            .clone();

        let outcome = match lot.queue.lock() {
            Ok(mut q) => q.enqueue(item),
            Err(_) => {
                error_poisoned(&account);
                return;
            }
        };

        match outcome {
            Ok(None) => {}
            Ok(Some(displaced)) => self.fail(
                displaced.correlation_id(),
                &TradegateError::QueueFull(format!("displaced from {account} queue")),
            ),
            Err(Rejected::Full(item)) => self.fail(
                item.correlation_id(),
                &TradegateError::QueueFull(format!("{account} queue is full")),
            ),
            // The pending deadline reports the timeout
            Err(Rejected::Expired(item)) => {
                debug!(correlation_id = %item.correlation_id(), "parked command already expired")
            }
        }
        lot.wake.notify_one();
    }
}

fn error_poisoned(account: &str) {
    tracing::error!(account = %account, "parked command queue poisoned");
}

/// Transmit one command, retrying transient failures with backoff. Parks the
/// command when the account is not connected.
async fn deliver(inner: Arc<DispatchInner>, mut item: QueuedCommand) {
    let id = item.command.correlation_id.clone();
    loop {
        if !inner.pending.contains(&id) {
            return;
        }

        let Some(transport) = inner.registry.connected_transport(&item.command.account_id) else {
            debug!(correlation_id = %id, account = %item.command.account_id, "account offline, parking command");
            inner.park(item);
            return;
        };

        item.attempt_count += 1;
        inner.pending.note_attempt(&id);

        match transport.send_command(&item.command).await {
            Ok(()) => {
                Metrics::inc(&inner.metrics.dispatched);
                debug!(correlation_id = %id, attempt = item.attempt_count, "command transmitted");
                return;
            }
            Err(e) if e.is_transient() && item.attempt_count <= inner.connector.max_retries => {
                let delay = inner.retry_delay(item.attempt_count);
                warn!(
                    correlation_id = %id,
                    attempt = item.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient transmit failure, retrying"
                );
                sleep(delay).await;
            }
            Err(e) => {
                inner.fail(&id, &e);
                return;
            }
        }
    }
}

/// One per account with parked commands: drains the queue in priority order
/// whenever the account's connection comes back.
async fn flush_parked(inner: Arc<DispatchInner>, account: String, lot: Arc<ParkingLot>) {
    let Some(mut state_rx) = inner.registry.subscribe(&account) else {
        fail_parked(&inner, &lot, &account);
        return;
    };

    loop {
        let state = state_rx.borrow_and_update().state;
        let live = || inner.registry.connected_transport(&account).is_some();
        if state.accepts_commands() && live() {
            loop {
                let next = lot.queue.lock().ok().and_then(|mut q| q.dequeue());
                let Some(item) = next else { break };
                sleep_until(item.next_attempt_time).await;
                deliver(Arc::clone(&inner), item).await;
                if !live() {
                    break;
                }
            }
        } else if state.is_terminal() {
            fail_parked(&inner, &lot, &account);
        }

        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    fail_parked(&inner, &lot, &account);
                    return;
                }
            }
            _ = lot.wake.notified() => {}
        }
    }
}

fn fail_parked(inner: &DispatchInner, lot: &ParkingLot, account: &str) {
    let drained = lot.queue.lock().map(|mut q| q.drain()).unwrap_or_default();
    let err = TradegateError::Connection(format!("account {account} is not reachable"));
    for item in drained {
        inner.fail(item.correlation_id(), &err);
    }
}
