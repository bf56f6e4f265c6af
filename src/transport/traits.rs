use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};

use super::envelope::{HeartbeatInfo, InboundEvent};
use crate::domain::TradeCommand;
use crate::error::{Result, TradegateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Request/response against the agent's HTTP endpoints
    Http,
    /// Persistent push session
    #[serde(rename = "websocket", alias = "ws")]
    WebSocket,
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::Http
    }
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::WebSocket => "websocket",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = TradegateError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" | "https" | "rest" => Ok(Self::Http),
            "websocket" | "ws" | "wss" => Ok(Self::WebSocket),
            other => Err(TradegateError::Validation(format!(
                "invalid transport '{other}'; expected http|websocket"
            ))),
        }
    }
}

/// Channels a transport reports into while a session is up
#[derive(Clone)]
pub struct TransportContext {
    pub account_id: String,
    pub inbound: mpsc::Sender<InboundEvent>,
    /// Signalled when the session is lost without a local close
    pub link_lost: Arc<Notify>,
}

/// One account's link to its remote execution agent.
///
/// Implementations are driven by a single connection worker; `send_command`
/// may additionally be called concurrently by the dispatcher.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn endpoint(&self) -> &str;

    /// Handshake; must fail within the transport's own timeout.
    async fn connect(&self, ctx: TransportContext) -> Result<()>;

    async fn heartbeat(&self) -> Result<HeartbeatInfo>;

    /// Transmit only. The result arrives later as an inbound callback.
    async fn send_command(&self, command: &TradeCommand) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn is_alive(&self) -> bool;
}
