use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Result, TradegateError};
use crate::transport::TransportKind;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Link lost; waiting out the backoff before the next handshake
    Reconnecting,
    /// Retries exhausted. Terminal.
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, target) {
            (Disconnected, Connecting) => true,

            (Connecting, Connected) => true,
            (Connecting, Reconnecting) => true,
            (Connecting, Error) => true,
            (Connecting, Disconnected) => true,

            (Connected, Reconnecting) => true,
            (Connected, Disconnected) => true,

            // Each retry re-enters Connecting; retry bookkeeping stays in Reconnecting
            (Reconnecting, Connecting) => true,
            (Reconnecting, Reconnecting) => true,
            (Reconnecting, Error) => true,
            (Reconnecting, Disconnected) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Error)
    }

    /// Only a connected link may carry new transmissions
    pub fn accepts_commands(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observable snapshot of one account's transport session
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub id: Uuid,
    pub account_id: String,
    pub transport: TransportKind,
    pub endpoint: String,
    pub state: ConnectionState,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
}

impl Connection {
    pub fn new(
        account_id: impl Into<String>,
        transport: TransportKind,
        endpoint: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.into(),
            transport,
            endpoint: endpoint.into(),
            state: ConnectionState::Disconnected,
            last_heartbeat: None,
            retry_count: 0,
            max_retries,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Apply a transition, rejecting ones the lifecycle does not allow.
    pub fn transition(&mut self, target: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(TradegateError::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        self.state = target;
        Ok(())
    }
}

/// Exponential reconnect schedule: `base × 2^attempt` for attempts
/// `0..max_retries`, so the longest wait is bounded by `base × 2^max_retries`.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based), or `None` once
    /// retries are exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay()))
    }

    pub fn max_delay(&self) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(self.max_retries))
    }
}
