//! Execution-side domain types: commands sent to the remote agent and the
//! results that come back.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::Direction;
use crate::error::TradegateError;

/// Command action understood by the remote execution agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandAction {
    Buy,
    Sell,
    /// Close an existing position (requires a ticket in `comment` or symbol-wide close)
    Close,
}

impl CommandAction {
    pub fn from_direction(direction: Direction) -> Option<Self> {
        match direction {
            Direction::Buy => Some(CommandAction::Buy),
            Direction::Sell => Some(CommandAction::Sell),
            Direction::Hold => None,
        }
    }
}

impl std::fmt::Display for CommandAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandAction::Buy => write!(f, "BUY"),
            CommandAction::Sell => write!(f, "SELL"),
            CommandAction::Close => write!(f, "CLOSE"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

/// Dispatch priority. Lower discriminant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPriority {
    /// Stop-outs and forced closes
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Default for CommandPriority {
    fn default() -> Self {
        CommandPriority::Normal
    }
}

/// A dispatch-ready instruction for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCommand {
    pub id: Uuid,
    /// Assigned by the dispatcher when empty
    #[serde(default)]
    pub correlation_id: String,
    pub account_id: String,
    pub symbol: String,
    pub action: CommandAction,
    pub lot_size: Decimal,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    pub magic_number: u32,
    #[serde(default)]
    pub priority: CommandPriority,
    pub timestamp: DateTime<Utc>,
    /// Per-command deadline, independent of connection heartbeats
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TradeCommand {
    pub fn market(
        account_id: impl Into<String>,
        symbol: impl Into<String>,
        action: CommandAction,
        lot_size: Decimal,
        timeout_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: String::new(),
            account_id: account_id.into(),
            symbol: symbol.into(),
            action,
            lot_size,
            order_type: OrderType::Market,
            price: None,
            stop_loss: None,
            take_profit: None,
            magic_number: 0,
            priority: CommandPriority::Normal,
            timestamp: Utc::now(),
            timeout_ms,
            comment: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_protection(mut self, stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn with_priority(mut self, priority: CommandPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_magic_number(mut self, magic_number: u32) -> Self {
        self.magic_number = magic_number;
        self
    }

    /// Shape validation; every violated rule is reported.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.account_id.trim().is_empty() {
            errors.push("account_id is required".to_string());
        }
        if self.symbol.trim().is_empty() {
            errors.push("symbol must not be empty".to_string());
        }
        if self.lot_size <= Decimal::ZERO {
            errors.push(format!("lot_size must be positive, got {}", self.lot_size));
        }
        if self.order_type != OrderType::Market && self.price.is_none() {
            errors.push(format!("{:?} order requires a price", self.order_type));
        }
        if self.timeout_ms == 0 {
            errors.push("timeout_ms must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Execution result reported by the remote agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCallback {
    /// Equals the command's correlation id
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
}

impl From<&TradegateError> for CommandError {
    fn from(err: &TradegateError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Terminal outcome of one dispatched command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub correlation_id: String,
    pub success: bool,
    pub execution_time_ms: u64,
    pub response: Option<TradeCallback>,
    pub error: Option<CommandError>,
    pub callback_received: bool,
    pub attempts: u32,
}

impl CommandResult {
    pub fn from_callback(callback: TradeCallback, execution_time_ms: u64, attempts: u32) -> Self {
        let error = if callback.success {
            None
        } else {
            Some(CommandError {
                code: "ExecutionFailed".to_string(),
                message: callback
                    .error
                    .clone()
                    .unwrap_or_else(|| "remote agent reported failure".to_string()),
            })
        };

        Self {
            correlation_id: callback.request_id.clone(),
            success: callback.success,
            execution_time_ms,
            response: Some(callback),
            error,
            callback_received: true,
            attempts,
        }
    }

    pub fn failure(
        correlation_id: impl Into<String>,
        err: &TradegateError,
        execution_time_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            success: false,
            execution_time_ms,
            response: None,
            error: Some(CommandError::from(err)),
            callback_received: false,
            attempts,
        }
    }

    pub fn timeout(correlation_id: &str, timeout_ms: u64, attempts: u32) -> Self {
        let err = TradegateError::CommandTimeout(format!(
            "no callback for {correlation_id} within {timeout_ms}ms"
        ));
        Self::failure(correlation_id, &err, timeout_ms, attempts)
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn validate_reports_every_problem() {
        let mut cmd = TradeCommand::market("", " ", CommandAction::Buy, dec!(0), 5000);
        cmd.order_type = OrderType::Limit;

        let errors = cmd.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn valid_market_command() {
        let cmd = TradeCommand::market("acc-1", "EUR_USD", CommandAction::Sell, dec!(0.10), 5000);
        assert!(cmd.validate().is_ok());
        assert!(cmd.correlation_id.is_empty());
    }

    #[test]
    fn timeout_result_carries_code() {
        let result = CommandResult::timeout("abc", 5000, 1);
        assert!(!result.success);
        assert!(!result.callback_received);
        assert_eq!(result.error_code(), Some("CommandTimeout"));
    }

    #[test]
    fn failed_callback_becomes_execution_failure() {
        let cb = TradeCallback {
            request_id: "abc".into(),
            success: false,
            ticket: None,
            execution_price: None,
            error: Some("market closed".into()),
            timestamp: Utc::now(),
        };
        let result = CommandResult::from_callback(cb, 12, 1);
        assert!(result.callback_received);
        assert_eq!(result.error_code(), Some("ExecutionFailed"));
    }

    #[test]
    fn callback_deserializes_without_timestamp() {
        let cb: TradeCallback =
            serde_json::from_str(r#"{"request_id":"x","success":true,"ticket":42}"#).unwrap();
        assert_eq!(cb.ticket, Some(42));
    }
}
