//! Commands in flight, keyed by correlation id.
//!
//! Every entry owns a oneshot sender; whoever removes the entry first
//! (callback, timer, transmit failure, shutdown) is the only one that can
//! resolve it. Resolution also settles the exposure the risk gate reserved
//! for an opening command: a fill books the position, anything else releases
//! it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{CommandAction, CommandResult, PolicyKind, TradeCallback, TradeCommand};
use crate::error::{Result, TradegateError};
use crate::risk::AccountBook;
use crate::selector::MarketRegime;

/// Which decision produced a command, for outcome attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionTag {
    pub policy: PolicyKind,
    pub regime: MarketRegime,
}

/// What is left of a command once it resolves
#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    pub account_id: String,
    pub symbol: String,
    pub action: CommandAction,
    pub lot_size: Decimal,
    pub tag: Option<DecisionTag>,
    pub result: CommandResult,
}

struct PendingEntry {
    account_id: String,
    symbol: String,
    action: CommandAction,
    lot_size: Decimal,
    tag: Option<DecisionTag>,
    started: Instant,
    attempts: u32,
    /// Lots reserved in the account book by the risk gate
    reserved: Option<Decimal>,
    reply: oneshot::Sender<CommandResult>,
    timer: Option<AbortHandle>,
}

impl PendingEntry {
    fn finish(self, result: CommandResult) -> ResolvedCommand {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        if self.reply.send(result.clone()).is_err() {
            debug!(correlation_id = %result.correlation_id, "caller dropped its handle");
        }
        ResolvedCommand {
            account_id: self.account_id,
            symbol: self.symbol,
            action: self.action,
            lot_size: self.lot_size,
            tag: self.tag,
            result,
        }
    }
}

#[derive(Default)]
pub struct PendingTable {
    entries: DashMap<String, PendingEntry>,
    accounts: Option<Arc<AccountBook>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settle risk reservations in `accounts` as commands resolve.
    pub fn with_accounts(accounts: Arc<AccountBook>) -> Self {
        Self {
            entries: DashMap::new(),
            accounts: Some(accounts),
        }
    }

    fn resolve(&self, entry: PendingEntry, result: CommandResult) -> ResolvedCommand {
        if let (Some(accounts), Some(lots)) = (&self.accounts, entry.reserved) {
            if result.success {
                accounts.confirm_open(&entry.account_id, lots);
            } else {
                accounts.release(&entry.account_id, lots);
            }
        }
        entry.finish(result)
    }

    /// Register a command under its correlation id. Fails when the id is
    /// already in flight.
    pub fn register(
        &self,
        command: &TradeCommand,
        tag: Option<DecisionTag>,
    ) -> Result<oneshot::Receiver<CommandResult>> {
        self.register_reserved(command, tag, None)
    }

    /// `register` for a command holding `reserved` lots in the account book.
    /// On error the caller still owns the reservation.
    pub fn register_reserved(
        &self,
        command: &TradeCommand,
        tag: Option<DecisionTag>,
        reserved: Option<Decimal>,
    ) -> Result<oneshot::Receiver<CommandResult>> {
        match self.entries.entry(command.correlation_id.clone()) {
            Entry::Occupied(_) => Err(TradegateError::Validation(format!(
                "correlation id {} is already pending",
                command.correlation_id
            ))),
            Entry::Vacant(slot) => {
                let (reply, rx) = oneshot::channel();
                slot.insert(PendingEntry {
                    account_id: command.account_id.clone(),
                    symbol: command.symbol.clone(),
                    action: command.action,
                    lot_size: command.lot_size,
                    tag,
                    started: Instant::now(),
                    attempts: 0,
                    reserved,
                    reply,
                    timer: None,
                });
                Ok(rx)
            }
        }
    }

    /// Start the per-command deadline. On expiry the entry resolves with
    /// `CommandTimeout` unless something else got there first.
    pub fn arm_timeout(
        self: &Arc<Self>,
        correlation_id: &str,
        after: Duration,
        on_expire: impl FnOnce(ResolvedCommand) + Send + 'static,
    ) {
        let table = Arc::clone(self);
        let id = correlation_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some((_, entry)) = table.entries.remove(&id) {
                let attempts = entry.attempts;
                let result = CommandResult::timeout(&id, after.as_millis() as u64, attempts);
                warn!(correlation_id = %id, timeout_ms = after.as_millis() as u64, "command timed out");
                on_expire(table.resolve(entry, result));
            }
        });
        match self.entries.get_mut(correlation_id) {
            Some(mut entry) => entry.timer = Some(handle.abort_handle()),
            None => handle.abort(),
        }
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.entries.contains_key(correlation_id)
    }

    pub fn note_attempt(&self, correlation_id: &str) -> Option<u32> {
        self.entries.get_mut(correlation_id).map(|mut e| {
            e.attempts += 1;
            e.attempts
        })
    }

    /// Resolve with the agent's callback. `None` when the id is unknown or
    /// was already resolved.
    pub fn complete(&self, callback: TradeCallback) -> Option<ResolvedCommand> {
        let (_, entry) = self.entries.remove(&callback.request_id)?;
        let elapsed = entry.started.elapsed().as_millis() as u64;
        let attempts = entry.attempts;
        Some(self.resolve(entry, CommandResult::from_callback(callback, elapsed, attempts)))
    }

    /// Resolve with a local failure.
    pub fn fail(&self, correlation_id: &str, err: &TradegateError) -> Option<ResolvedCommand> {
        let (_, entry) = self.entries.remove(correlation_id)?;
        let elapsed = entry.started.elapsed().as_millis() as u64;
        let attempts = entry.attempts;
        Some(self.resolve(entry, CommandResult::failure(correlation_id, err, elapsed, attempts)))
    }

    /// Fail everything still in flight.
    pub fn fail_all(&self, err: &TradegateError) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.fail(id, err).is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn command(id: &str) -> TradeCommand {
        TradeCommand::market("acc", "EUR_USD", CommandAction::Buy, dec!(0.1), 5000).with_correlation_id(id)
    }

    fn callback(id: &str) -> TradeCallback {
        TradeCallback {
            request_id: id.into(),
            success: true,
            ticket: Some(7),
            execution_price: Some(dec!(1.1)),
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn resolves_exactly_once() {
        let table = PendingTable::new();
        let rx = table.register(&command("c1"), None).unwrap();

        assert!(table.complete(callback("c1")).is_some());
        assert!(table.complete(callback("c1")).is_none());
        assert!(table.fail("c1", &TradegateError::Cancelled).is_none());

        let result = rx.await.unwrap();
        assert!(result.success && result.callback_received);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn resolution_settles_the_reservation() {
        let accounts = Arc::new(AccountBook::new());
        let table = PendingTable::with_accounts(Arc::clone(&accounts));
        for id in ["fill", "drop"] {
            accounts.reserve_with("acc", |_| ((), Some(dec!(0.1))));
            table.register_reserved(&command(id), None, Some(dec!(0.1))).unwrap();
        }
        assert_eq!(accounts.snapshot("acc").pending_positions, 2);

        table.complete(callback("fill"));
        table.fail("drop", &TradegateError::Cancelled);

        let s = accounts.snapshot("acc");
        assert_eq!((s.open_positions, s.pending_positions), (1, 0));
        assert_eq!(s.daily_risk_used, dec!(0.1));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let table = PendingTable::new();
        let _rx = table.register(&command("dup"), None).unwrap();
        assert!(table.register(&command("dup"), None).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_resolves_with_timeout() {
        let table = Arc::new(PendingTable::new());
        let rx = table.register(&command("slow"), None).unwrap();
        table.arm_timeout("slow", Duration::from_millis(5000), |_| {});

        let result = rx.await.unwrap();
        assert_eq!(result.error_code(), Some("CommandTimeout"));
        assert!(!table.contains("slow"));
    }
}
