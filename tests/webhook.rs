use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tokio::sync::mpsc;
use tower::ServiceExt;

use tradegate::services::webhook::{routes, sign, SIGNATURE_HEADER};
use tradegate::services::WebhookState;
use tradegate::transport::{InboundEvent, InboundMessage};

const SECRET: &str = "hook-secret";

fn app(secret: Option<&str>) -> (axum::Router, mpsc::Receiver<InboundEvent>) {
    let (tx, rx) = mpsc::channel(8);
    let state = Arc::new(WebhookState::new(secret.map(str::to_string), tx));
    (routes(state), rx)
}

fn execution_event() -> serde_json::Value {
    json!({
        "type": "trade_execution",
        "account_id": "acct-1",
        "timestamp": "2024-03-01T12:00:00Z",
        "data": {
            "request_id": "req-1",
            "success": true,
            "ticket": 991,
            "execution_price": "1.10420"
        }
    })
}

fn post(body: Vec<u8>, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header(SIGNATURE_HEADER, sig);
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn signed_header_delivery_is_forwarded() {
    let (app, mut rx) = app(Some(SECRET));
    let body = serde_json::to_vec(&execution_event()).unwrap();
    let sig = sign(SECRET, &body);

    let response = app.oneshot(post(body, Some(&sig))).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.account_id, "acct-1");
    match event.message {
        InboundMessage::Callback(cb) => {
            assert_eq!(cb.request_id, "req-1");
            assert!(cb.success);
            assert_eq!(cb.ticket, Some(991));
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn signature_field_is_checked_over_unsigned_event() {
    let (app, mut rx) = app(Some(SECRET));
    let mut event = execution_event();
    let unsigned: tradegate::transport::WebhookEvent = serde_json::from_value(event.clone()).unwrap();
    let sig = sign(SECRET, &serde_json::to_vec(&unsigned).unwrap());
    event["signature"] = json!(sig);

    let response = app
        .oneshot(post(serde_json::to_vec(&event).unwrap(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(rx.recv().await.is_some());
}

#[tokio::test]
async fn bad_or_missing_signature_is_unauthorized() {
    let body = serde_json::to_vec(&execution_event()).unwrap();

    let (app, mut rx) = app(Some(SECRET));
    let forged = sign("wrong", &body);
    let response = app.oneshot(post(body.clone(), Some(&forged))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (app, _) = self::app(Some(SECRET));
    let response = app.oneshot(post(body, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unsigned_delivery_accepted_without_secret() {
    let (app, mut rx) = app(None);
    let body = serde_json::to_vec(&json!({
        "type": "heartbeat",
        "account_id": "acct-1",
        "data": { "agent_version": "2.1.0" }
    }))
    .unwrap();

    let response = app.oneshot(post(body, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(matches!(rx.recv().await.unwrap().message, InboundMessage::Heartbeat(_)));
}

#[tokio::test]
async fn malformed_and_mistyped_bodies_are_rejected() {
    let (app, _) = self::app(None);
    let response = app.oneshot(post(b"{not json".to_vec(), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (app, _) = self::app(None);
    let body = serde_json::to_vec(&json!({
        "type": "trade_execution",
        "account_id": "acct-1",
        "data": { "ticket": "not-a-number" }
    }))
    .unwrap();
    let response = app.oneshot(post(body, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
