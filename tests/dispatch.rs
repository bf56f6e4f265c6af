mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::Instant;

use common::{FixedPolicy, Reply, ScriptedTransport};
use tradegate::connection::ConnectionState;
use tradegate::domain::{CommandAction, CommandPriority, PolicyKind, TradeCallback, TradeCommand};
use tradegate::ensemble::{constraint_violation, EnsembleConfig, EnsembleEngine};
use tradegate::transport::InboundMessage;
use tradegate::{AppConfig, TradeGate};

const ACCOUNT: &str = "acct-1";

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.connector.enable_metrics = false;
    config.risk.max_concurrent_positions = 100;
    config.risk.max_daily_risk = dec!(100);
    config
}

fn gate() -> TradeGate {
    gate_from(config())
}

fn gate_from(config: AppConfig) -> TradeGate {
    let engine = EnsembleEngine::new(EnsembleConfig::default())
        .with_policy(FixedPolicy::new("baseline", PolicyKind::Baseline, [0.3, 0.7, 0.0]));
    let gate = TradeGate::with_engine(config, engine);
    gate.spawn_background().unwrap();
    gate
}

async fn connected_gate(transport: Arc<ScriptedTransport>) -> TradeGate {
    let gate = gate();
    gate.attach_transport(ACCOUNT, transport).await.unwrap();
    gate
}

fn buy(lot: Decimal, timeout_ms: u64) -> TradeCommand {
    TradeCommand::market(ACCOUNT, "EUR_USD", CommandAction::Buy, lot, timeout_ms)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn silent_agent_times_out_after_command_timeout() {
    let transport = ScriptedTransport::new(Reply::Silent);
    let gate = connected_gate(transport.clone()).await;

    let start = Instant::now();
    let handle = gate.dispatcher.send(buy(dec!(0.1), 5000), &[]);
    let id = handle.correlation_id().to_string();
    let result = handle.await;

    assert!(!result.success);
    assert_eq!(result.error_code(), Some("CommandTimeout"));
    assert!(!result.callback_received);
    assert!(start.elapsed() >= Duration::from_millis(5000));
    assert_eq!(transport.sent_count(), 1);
    assert_eq!(gate.dispatcher.pending_count(), 0);
    assert_eq!(gate.metrics.timed_out.load(Ordering::SeqCst), 1);

    // a late callback is discarded
    transport
        .push(InboundMessage::Callback(TradeCallback {
            request_id: id,
            success: true,
            ticket: Some(7),
            execution_price: None,
            error: None,
            timestamp: Utc::now(),
        }))
        .await;
    let metrics = gate.metrics.clone();
    eventually(move || metrics.callback_mismatches.load(Ordering::SeqCst) == 1).await;
    assert_eq!(gate.accounts.snapshot(ACCOUNT).open_positions, 0);
}

#[tokio::test(start_paused = true)]
async fn fill_resolves_once_and_books_the_position() {
    let transport = ScriptedTransport::new(Reply::Fill);
    let gate = connected_gate(transport.clone()).await;

    let handle = gate.dispatcher.send(buy(dec!(0.2), 5000), &[]);
    let id = handle.correlation_id().to_string();
    let result = handle.await;

    assert!(result.success);
    assert!(result.callback_received);
    assert_eq!(result.correlation_id, id);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.response.as_ref().and_then(|r| r.ticket), Some(1000));

    let snapshot = gate.accounts.snapshot(ACCOUNT);
    assert_eq!(snapshot.open_positions, 1);
    assert_eq!(snapshot.daily_risk_used, dec!(0.2));

    // duplicate delivery of the same result
    transport
        .push(InboundMessage::Callback(result.response.clone().unwrap()))
        .await;
    let metrics = gate.metrics.clone();
    eventually(move || metrics.callback_mismatches.load(Ordering::SeqCst) == 1).await;
    assert_eq!(gate.accounts.snapshot(ACCOUNT).open_positions, 1);
    assert_eq!(gate.metrics.succeeded.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn remote_rejection_is_reported_as_failure() {
    let transport = ScriptedTransport::new(Reply::Reject);
    let gate = connected_gate(transport).await;

    let result = gate.dispatcher.send(buy(dec!(0.1), 5000), &[]).await;

    assert!(!result.success);
    assert!(result.callback_received);
    assert_eq!(result.error_code(), Some("ExecutionFailed"));
    assert_eq!(gate.accounts.snapshot(ACCOUNT).open_positions, 0);
}

#[tokio::test(start_paused = true)]
async fn correlation_ids_are_unique() {
    let transport = ScriptedTransport::new(Reply::Fill);
    let gate = connected_gate(transport.clone()).await;

    let handles: Vec<_> = (0..20)
        .map(|_| gate.dispatcher.send(buy(dec!(0.01), 5000), &[]))
        .collect();
    let ids: HashSet<String> = handles.iter().map(|h| h.correlation_id().to_string()).collect();
    assert_eq!(ids.len(), 20);

    for handle in handles {
        assert!(handle.await.success);
    }
    assert_eq!(transport.sent_count(), 20);
}

#[tokio::test(start_paused = true)]
async fn caller_supplied_id_cannot_be_reused_while_pending() {
    let transport = ScriptedTransport::new(Reply::Silent);
    let gate = connected_gate(transport).await;

    let first = gate
        .dispatcher
        .send(buy(dec!(0.1), 5000).with_correlation_id("order-42"), &[]);
    let second = gate
        .dispatcher
        .send(buy(dec!(0.1), 5000).with_correlation_id("order-42"), &[]);

    assert!(!first.is_resolved());
    assert!(second.is_resolved());
    assert_eq!(second.await.error_code(), Some("ValidationError"));
    assert_eq!(first.correlation_id(), "order-42");
    assert_eq!(gate.accounts.snapshot(ACCOUNT).pending_positions, 1);
}

#[tokio::test(start_paused = true)]
async fn risk_gate_blocks_before_transmission() {
    let transport = ScriptedTransport::new(Reply::Fill);
    let gate = connected_gate(transport.clone()).await;

    let oversized = gate.dispatcher.send(buy(dec!(2.0), 5000), &[]);
    assert!(oversized.is_resolved());
    let result = oversized.await;
    assert_eq!(result.error_code(), Some("RiskRejection"));
    assert_eq!(result.attempts, 0);

    let severe = constraint_violation("constrained", 0.9, 0.5).unwrap();
    let blocked = gate.dispatcher.send(buy(dec!(0.1), 5000), &[severe]).await;
    assert_eq!(blocked.error_code(), Some("RiskRejection"));

    assert_eq!(transport.sent_count(), 0);
    assert_eq!(gate.metrics.risk_rejections.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn invalid_and_unroutable_commands_fail_fast() {
    let gate = connected_gate(ScriptedTransport::new(Reply::Fill)).await;

    let zero = gate.dispatcher.send(buy(Decimal::ZERO, 5000), &[]).await;
    assert_eq!(zero.error_code(), Some("ValidationError"));

    let stranger = TradeCommand::market("nobody", "EUR_USD", CommandAction::Sell, dec!(0.1), 5000);
    let unknown = gate.dispatcher.send(stranger, &[]).await;
    assert_eq!(unknown.error_code(), Some("ConnectionError"));
    assert_eq!(gate.accounts.snapshot("nobody").committed_positions(), 0);
}

#[tokio::test(start_paused = true)]
async fn in_flight_commands_hold_exposure_until_resolved() {
    let mut config = config();
    config.risk.max_concurrent_positions = 1;
    config.risk.max_daily_risk = dec!(0.5);
    let transport = ScriptedTransport::new(Reply::Silent);
    let gate = gate_from(config);
    gate.attach_transport(ACCOUNT, transport.clone()).await.unwrap();

    let handles: Vec<_> = (0..5)
        .map(|_| gate.dispatcher.send(buy(dec!(0.4), 5000), &[]))
        .collect();
    let (accepted, rejected): (Vec<_>, Vec<_>) = handles.into_iter().partition(|h| !h.is_resolved());
    assert_eq!(accepted.len(), 1);
    assert_eq!(rejected.len(), 4);
    for handle in rejected {
        assert_eq!(handle.await.error_code(), Some("RiskRejection"));
    }

    let account = gate.accounts.snapshot(ACCOUNT);
    assert_eq!(account.pending_positions, 1);
    assert_eq!(account.pending_lots, dec!(0.4));

    // the timeout gives the reservation back
    for handle in accepted {
        assert_eq!(handle.await.error_code(), Some("CommandTimeout"));
    }
    assert_eq!(transport.sent_count(), 1);
    let account = gate.accounts.snapshot(ACCOUNT);
    assert_eq!(account.committed_positions(), 0);
    assert_eq!(account.committed_risk(), Decimal::ZERO);

    let again = gate.dispatcher.send(buy(dec!(0.4), 5000), &[]);
    assert!(!again.is_resolved());
}

#[tokio::test(start_paused = true)]
async fn fill_turns_the_reservation_into_a_position() {
    let mut config = config();
    config.risk.max_concurrent_positions = 1;
    let gate = gate_from(config);
    gate.attach_transport(ACCOUNT, ScriptedTransport::new(Reply::Fill)).await.unwrap();

    assert!(gate.dispatcher.send(buy(dec!(0.3), 5000), &[]).await.success);
    let account = gate.accounts.snapshot(ACCOUNT);
    assert_eq!((account.open_positions, account.pending_positions), (1, 0));
    assert_eq!(account.daily_risk_used, dec!(0.3));

    let blocked = gate.dispatcher.send(buy(dec!(0.3), 5000), &[]).await;
    assert_eq!(blocked.error_code(), Some("RiskRejection"));
}

#[tokio::test(start_paused = true)]
async fn transient_send_failures_are_retried_with_backoff() {
    let transport = ScriptedTransport::new(Reply::Fill);
    transport.send_failures.store(2, Ordering::SeqCst);
    let gate = connected_gate(transport.clone()).await;

    let start = Instant::now();
    let result = gate.dispatcher.send(buy(dec!(0.1), 10_000), &[]).await;

    assert!(result.success);
    assert_eq!(result.attempts, 3);
    // 1000 ms then 2000 ms
    assert!(start.elapsed() >= Duration::from_millis(3000));
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn offline_commands_park_and_flush_by_priority() {
    let transport = ScriptedTransport::with_handshakes(Reply::Fill, [false]);
    let gate = gate();
    assert!(gate.attach_transport(ACCOUNT, transport.clone()).await.is_err());
    assert_eq!(
        gate.connections.registry().state(ACCOUNT),
        Some(ConnectionState::Reconnecting)
    );

    let low = gate
        .dispatcher
        .send(buy(dec!(0.1), 5000).with_priority(CommandPriority::Low), &[]);
    let critical = gate.dispatcher.send(
        TradeCommand::market(ACCOUNT, "EUR_USD", CommandAction::Close, dec!(0.1), 5000)
            .with_priority(CommandPriority::Critical),
        &[],
    );
    let dispatcher = gate.dispatcher.clone();
    eventually(move || dispatcher.parked_count() == 2).await;
    assert_eq!(transport.sent_count(), 0);

    let (low, critical) = (low.await, critical.await);
    assert!(low.success && critical.success);

    let sent = transport.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].action, CommandAction::Close);
    assert_eq!(sent[1].action, CommandAction::Buy);
    assert_eq!(gate.metrics.reconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn parked_commands_fail_when_reconnects_are_exhausted() {
    let gate = gate();
    let _ = gate.attach_transport(ACCOUNT, ScriptedTransport::unreachable()).await;

    let result = gate.dispatcher.send(buy(dec!(0.1), 60_000), &[]).await;
    assert_eq!(result.error_code(), Some("ConnectionError"));
    assert_eq!(
        gate.connections.registry().state(ACCOUNT),
        Some(ConnectionState::Error)
    );

    let late = gate.dispatcher.send(buy(dec!(0.1), 5000), &[]);
    assert!(late.is_resolved());
    assert_eq!(late.await.error_code(), Some("ConnectionError"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_unresolved_commands() {
    let transport = ScriptedTransport::new(Reply::Silent);
    let gate = connected_gate(transport).await;

    let pending = gate.dispatcher.send(buy(dec!(0.1), 60_000), &[]);
    let report = gate.stop().await;

    assert!(!report.drained);
    assert_eq!(report.cancelled, 1);
    assert_eq!(pending.await.error_code(), Some("Cancelled"));
    assert_eq!(
        gate.connections.registry().state(ACCOUNT),
        Some(ConnectionState::Disconnected)
    );

    let after = gate.dispatcher.send(buy(dec!(0.1), 5000), &[]).await;
    assert_eq!(after.error_code(), Some("Cancelled"));
}
