//! Matches inbound execution results to pending commands and feeds closed
//! positions back into the selector's performance book.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::handlers::{InboundHandler, LoggingHandler};
use crate::connection::ConnectionManager;
use crate::dispatch::{DecisionTag, PendingTable};
use crate::domain::{CommandAction, CommandResult, TradeCallback};
use crate::error::TradegateError;
use crate::risk::AccountBook;
use crate::selector::{AgentSelector, TradeOutcome};
use crate::services::Metrics;
use crate::transport::{InboundEvent, InboundMessage, PositionStatus, PositionUpdateData};

/// An open position and the decision that produced it
#[derive(Debug, Clone)]
pub struct Attribution {
    pub symbol: String,
    pub lot_size: Decimal,
    pub tag: Option<DecisionTag>,
    pub opened_at: DateTime<Utc>,
}

pub struct CallbackCorrelator {
    pending: Arc<PendingTable>,
    selector: Arc<AgentSelector>,
    accounts: Arc<AccountBook>,
    metrics: Arc<Metrics>,
    connections: Option<Arc<ConnectionManager>>,
    handlers: Vec<Arc<dyn InboundHandler>>,
    /// (account, ticket) -> attribution
    open: DashMap<(String, u64), Attribution>,
    attribution_ttl: chrono::Duration,
}

impl CallbackCorrelator {
    pub fn new(
        pending: Arc<PendingTable>,
        selector: Arc<AgentSelector>,
        accounts: Arc<AccountBook>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pending,
            selector,
            accounts,
            metrics,
            connections: None,
            handlers: vec![Arc::new(LoggingHandler)],
            open: DashMap::new(),
            attribution_ttl: chrono::Duration::days(7),
        }
    }

    /// Forget tickets whose close has not been reported within `ttl`
    pub fn with_attribution_ttl(mut self, ttl: Duration) -> Self {
        self.attribution_ttl =
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(7));
        self
    }

    /// Route agent heartbeats to the connection manager
    pub fn with_connections(mut self, connections: Arc<ConnectionManager>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn open_positions(&self) -> usize {
        self.open.len()
    }

    /// Resolve the pending command named by `callback.request_id`.
    ///
    /// Unknown and already-resolved ids are logged and dropped.
    pub fn on_result(&self, account_id: &str, callback: TradeCallback) -> Option<CommandResult> {
        let request_id = callback.request_id.clone();
        let ticket = callback.ticket;

        let Some(resolved) = self.pending.complete(callback) else {
            Metrics::inc(&self.metrics.callback_mismatches);
            let err = TradegateError::CallbackMismatch(format!(
                "no pending command for request id {request_id}"
            ));
            warn!(account = %account_id, error = %err, "discarding callback");
            return None;
        };

        let result = resolved.result;
        if result.success {
            Metrics::inc(&self.metrics.succeeded);
            // The pending table has already booked the fill in the account book
            if resolved.action != CommandAction::Close {
                if let Some(ticket) = ticket {
                    self.evict_stale(Utc::now());
                    self.open.insert(
                        (resolved.account_id.clone(), ticket),
                        Attribution {
                            symbol: resolved.symbol,
                            lot_size: resolved.lot_size,
                            tag: resolved.tag,
                            opened_at: Utc::now(),
                        },
                    );
                }
            }
            info!(
                correlation_id = %result.correlation_id,
                account = %resolved.account_id,
                ticket = ?ticket,
                execution_ms = result.execution_time_ms,
                "command executed"
            );
        } else {
            Metrics::inc(&self.metrics.failed);
            warn!(
                correlation_id = %result.correlation_id,
                account = %resolved.account_id,
                error = ?result.error,
                "command failed remotely"
            );
        }
        Some(result)
    }

    pub fn handle(&self, event: InboundEvent) {
        let InboundEvent {
            account_id,
            message,
        } = event;

        match message {
            InboundMessage::Callback(callback) => {
                self.on_result(&account_id, callback);
            }
            InboundMessage::PositionUpdate(update) => {
                for h in &self.handlers {
                    h.on_position_update(&account_id, &update);
                }
                self.on_position_update(&account_id, &update);
            }
            InboundMessage::OrderUpdate(update) => {
                for h in &self.handlers {
                    h.on_order_update(&account_id, &update);
                }
            }
            InboundMessage::AgentError(error) => {
                for h in &self.handlers {
                    h.on_agent_error(&account_id, &error);
                }
                // An error naming a pending request is that request's result
                if let Some(request_id) = error.request_id.clone() {
                    if self.pending.contains(&request_id) {
                        self.on_result(
                            &account_id,
                            TradeCallback {
                                request_id,
                                success: false,
                                ticket: None,
                                execution_price: None,
                                error: Some(error.message),
                                timestamp: Utc::now(),
                            },
                        );
                    }
                }
            }
            InboundMessage::Heartbeat(info) => {
                if let Some(connections) = &self.connections {
                    connections.record_heartbeat(&account_id, &info);
                }
            }
            InboundMessage::MarketData(data) => {
                for h in &self.handlers {
                    h.on_market_data(&account_id, &data);
                }
            }
        }
    }

    fn on_position_update(&self, account_id: &str, update: &PositionUpdateData) {
        if let Some(open_positions) = update.open_positions {
            self.accounts.sync_open_positions(account_id, open_positions);
        }
        if update.status != PositionStatus::Closed {
            return;
        }

        let attribution = self.open.remove(&(account_id.to_string(), update.ticket)).map(|(_, a)| a);
        let realized = update.profit.unwrap_or(Decimal::ZERO);
        if update.open_positions.is_some() {
            self.accounts.record_pnl(account_id, realized);
        } else {
            self.accounts.record_close(account_id, realized);
        }
        let Some(profit) = update.profit else {
            debug!(account = %account_id, ticket = update.ticket, "close without profit, outcome not recorded");
            return;
        };

        let Some(attribution) = attribution else {
            debug!(account = %account_id, ticket = update.ticket, "close for untracked ticket");
            return;
        };
        let Some(tag) = attribution.tag else {
            return;
        };

        let return_value = if attribution.lot_size > Decimal::ZERO {
            (profit / attribution.lot_size).to_f64().unwrap_or(0.0)
        } else {
            profit.to_f64().unwrap_or(0.0)
        };
        self.selector.record_outcome(TradeOutcome {
            policy: tag.policy,
            regime: tag.regime,
            return_value,
            closed_at: Utc::now(),
        });
        info!(
            account = %account_id,
            ticket = update.ticket,
            symbol = %attribution.symbol,
            policy = %tag.policy,
            regime = %tag.regime,
            return_per_lot = return_value,
            "outcome recorded"
        );
    }

    /// Drop attributions opened more than the configured ttl before `now`.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let before = self.open.len();
        self.open.retain(|_, a| now - a.opened_at < self.attribution_ttl);
        let evicted = before.saturating_sub(self.open.len());
        if evicted > 0 {
            debug!(evicted, "forgot attributions with no close report");
        }
        evicted
    }

    /// Consume inbound events until every sender is dropped.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundEvent>) {
        while let Some(event) = inbound.recv().await {
            debug!(account = %event.account_id, kind = event.message.kind(), "inbound event");
            self.handle(event);
        }
        debug!("inbound channel closed, correlator stopping");
    }
}
