//! Transports to remote execution agents

pub mod envelope;
pub mod http;
pub mod traits;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

pub use envelope::{
    Envelope, EnvelopeType, ErrorData, HeartbeatInfo, InboundEvent, InboundMessage,
    OrderUpdateData, PositionStatus, PositionUpdateData, WebhookEvent, WebhookEventType,
};
pub use http::HttpTransport;
pub use traits::{Transport, TransportContext, TransportKind};
pub use websocket::{WsSettings, WsTransport};

use crate::config::{AccountConfig, ConnectorConfig};
use crate::error::Result;

/// Builds the transport an account is configured for.
pub fn build(account: &AccountConfig, connector: &ConnectorConfig) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match account.transport {
        TransportKind::Http => Arc::new(HttpTransport::new(
            &account.endpoint,
            account.account_id.clone(),
            account.credential.clone(),
            Duration::from_millis(connector.http_timeout_ms),
        )?),
        TransportKind::WebSocket => {
            let heartbeat = Duration::from_millis(connector.heartbeat_interval_ms);
            Arc::new(WsTransport::new(
                &account.endpoint,
                account.account_id.clone(),
                account.credential.clone(),
                WsSettings {
                    connect_timeout: Duration::from_millis(connector.ws_timeout_ms),
                    ping_interval: heartbeat / 2,
                    stale_after: heartbeat * 2,
                },
            )?)
        }
    };
    Ok(transport)
}
