//! `POST /webhook` receiver for agents that report results over HTTP.
//!
//! When a secret is configured every delivery must carry a hex HMAC-SHA256
//! signature, either in the `x-signature` header (over the raw body) or in
//! the event's `signature` field (over the event serialized without it).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::{InboundEvent, WebhookEvent};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";

pub struct WebhookState {
    secret: Option<String>,
    inbound: mpsc::Sender<InboundEvent>,
}

impl WebhookState {
    pub fn new(secret: Option<String>, inbound: mpsc::Sender<InboundEvent>) -> Self {
        Self { secret, inbound }
    }
}

pub fn routes(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler))
        .with_state(state)
}

/// Hex HMAC-SHA256 of `body` under `secret`
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Constant-time check of a hex signature
pub fn verify(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn reject(status: StatusCode, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "accepted": false, "error": message })))
}

async fn webhook_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let mut event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "malformed webhook body");
            return reject(StatusCode::BAD_REQUEST, "malformed event");
        }
    };

    if let Some(secret) = &state.secret {
        let header_sig = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let valid = match (header_sig, event.signature.take()) {
            (Some(sig), _) => verify(secret, &body, &sig),
            (None, Some(sig)) => match serde_json::to_vec(&event) {
                Ok(unsigned) => verify(secret, &unsigned, &sig),
                Err(_) => false,
            },
            (None, None) => false,
        };
        if !valid {
            warn!(account = %event.account_id, "webhook signature rejected");
            return reject(StatusCode::UNAUTHORIZED, "invalid signature");
        }
    }

    let account_id = event.account_id.clone();
    let message = match event.into_inbound() {
        Ok(message) => message,
        Err(e) => {
            debug!(account = %account_id, error = %e, "undecodable webhook payload");
            return reject(StatusCode::UNPROCESSABLE_ENTITY, "payload does not match event type");
        }
    };

    let kind = message.kind();
    if state
        .inbound
        .send(InboundEvent::new(account_id.clone(), message))
        .await
        .is_err()
    {
        return reject(StatusCode::SERVICE_UNAVAILABLE, "correlator stopped");
    }

    debug!(account = %account_id, kind, "webhook accepted");
    (StatusCode::ACCEPTED, Json(json!({ "accepted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_roundtrip_and_tamper() {
        let body = br#"{"type":"heartbeat","account_id":"a"}"#;
        let sig = sign("s3cret", body);
        assert_eq!(sig.len(), 64);
        assert!(verify("s3cret", body, &sig));
        assert!(!verify("other", body, &sig));
        assert!(!verify("s3cret", b"tampered", &sig));
        assert!(!verify("s3cret", body, "not-hex"));
    }
}
