//! Wire formats shared by the push transport and the webhook receiver.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{TradeCallback, TradeCommand};
use crate::error::{Result, TradegateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    Command,
    Callback,
    PositionUpdate,
    OrderUpdate,
    Error,
    Heartbeat,
    MarketData,
}

/// Push-transport frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub account_id: String,
}

impl Envelope {
    pub fn command(command: &TradeCommand) -> Result<Self> {
        Ok(Self {
            kind: EnvelopeType::Command,
            payload: serde_json::to_value(command)?,
            timestamp: Utc::now(),
            message_id: command.correlation_id.clone(),
            account_id: command.account_id.clone(),
        })
    }

    pub fn heartbeat(account_id: &str) -> Self {
        Self {
            kind: EnvelopeType::Heartbeat,
            payload: Value::Null,
            timestamp: Utc::now(),
            message_id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
        }
    }

    /// Decode the payload of an inbound frame
    pub fn into_inbound(self) -> Result<InboundMessage> {
        let message = match self.kind {
            EnvelopeType::Callback => InboundMessage::Callback(serde_json::from_value(self.payload)?),
            EnvelopeType::PositionUpdate => {
                InboundMessage::PositionUpdate(serde_json::from_value(self.payload)?)
            }
            EnvelopeType::OrderUpdate => {
                InboundMessage::OrderUpdate(serde_json::from_value(self.payload)?)
            }
            EnvelopeType::Error => InboundMessage::AgentError(serde_json::from_value(self.payload)?),
            EnvelopeType::Heartbeat => {
                let info = if self.payload.is_null() {
                    HeartbeatInfo::default()
                } else {
                    serde_json::from_value(self.payload)?
                };
                InboundMessage::Heartbeat(info)
            }
            EnvelopeType::MarketData => InboundMessage::MarketData(self.payload),
            EnvelopeType::Command => {
                return Err(TradegateError::Validation(
                    "command frames are outbound only".to_string(),
                ))
            }
        };
        Ok(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    TradeExecution,
    PositionUpdate,
    OrderUpdate,
    Error,
    Heartbeat,
}

/// Webhook delivery from the remote agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: WebhookEventType,
    pub account_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl WebhookEvent {
    pub fn into_inbound(self) -> Result<InboundMessage> {
        let message = match self.kind {
            WebhookEventType::TradeExecution => {
                InboundMessage::Callback(serde_json::from_value(self.data)?)
            }
            WebhookEventType::PositionUpdate => {
                InboundMessage::PositionUpdate(serde_json::from_value(self.data)?)
            }
            WebhookEventType::OrderUpdate => {
                InboundMessage::OrderUpdate(serde_json::from_value(self.data)?)
            }
            WebhookEventType::Error => InboundMessage::AgentError(serde_json::from_value(self.data)?),
            WebhookEventType::Heartbeat => {
                InboundMessage::Heartbeat(serde_json::from_value(self.data).unwrap_or_default())
            }
        };
        Ok(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Modified,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdateData {
    pub ticket: u64,
    pub symbol: String,
    pub status: PositionStatus,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub open_price: Option<Decimal>,
    #[serde(default)]
    pub close_price: Option<Decimal>,
    /// Realized profit on close, floating profit otherwise
    #[serde(default)]
    pub profit: Option<Decimal>,
    /// Open positions on the account after this update, when the agent reports it
    #[serde(default)]
    pub open_positions: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdateData {
    pub ticket: u64,
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Remote agent identity reported by heartbeats
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatInfo {
    #[serde(default)]
    pub agent_version: Option<String>,
    #[serde(default)]
    pub broker: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
}

/// Decoded inbound traffic, transport-independent
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Callback(TradeCallback),
    PositionUpdate(PositionUpdateData),
    OrderUpdate(OrderUpdateData),
    AgentError(ErrorData),
    Heartbeat(HeartbeatInfo),
    MarketData(Value),
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Callback(_) => "callback",
            InboundMessage::PositionUpdate(_) => "position_update",
            InboundMessage::OrderUpdate(_) => "order_update",
            InboundMessage::AgentError(_) => "error",
            InboundMessage::Heartbeat(_) => "heartbeat",
            InboundMessage::MarketData(_) => "market_data",
        }
    }
}

/// Inbound message tagged with its source account
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub account_id: String,
    pub message: InboundMessage,
}

impl InboundEvent {
    pub fn new(account_id: impl Into<String>, message: InboundMessage) -> Self {
        Self {
            account_id: account_id.into(),
            message,
        }
    }
}
