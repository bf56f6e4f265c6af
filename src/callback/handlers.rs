use serde_json::Value;
use tracing::{debug, info, warn};

use crate::transport::{ErrorData, OrderUpdateData, PositionStatus, PositionUpdateData};

/// Observer for inbound traffic that does not resolve a command.
///
/// All methods default to no-ops so implementors pick what they need.
pub trait InboundHandler: Send + Sync {
    fn on_position_update(&self, _account_id: &str, _update: &PositionUpdateData) {}

    fn on_order_update(&self, _account_id: &str, _update: &OrderUpdateData) {}

    fn on_agent_error(&self, _account_id: &str, _error: &ErrorData) {}

    fn on_market_data(&self, _account_id: &str, _data: &Value) {}
}

/// Structured log line per event
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl InboundHandler for LoggingHandler {
    fn on_position_update(&self, account_id: &str, update: &PositionUpdateData) {
        match update.status {
            PositionStatus::Closed => info!(
                account = %account_id,
                ticket = update.ticket,
                symbol = %update.symbol,
                profit = ?update.profit,
                "position closed"
            ),
            status => debug!(
                account = %account_id,
                ticket = update.ticket,
                symbol = %update.symbol,
                status = ?status,
                "position update"
            ),
        }
    }

    fn on_order_update(&self, account_id: &str, update: &OrderUpdateData) {
        debug!(
            account = %account_id,
            ticket = update.ticket,
            symbol = %update.symbol,
            status = %update.status,
            "order update"
        );
    }

    fn on_agent_error(&self, account_id: &str, error: &ErrorData) {
        warn!(
            account = %account_id,
            code = ?error.code,
            request_id = ?error.request_id,
            message = %error.message,
            "agent reported error"
        );
    }

    fn on_market_data(&self, account_id: &str, data: &Value) {
        debug!(account = %account_id, bytes = data.to_string().len(), "market data");
    }
}
