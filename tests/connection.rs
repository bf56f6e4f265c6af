mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use common::{Reply, ScriptedTransport};
use tradegate::config::ConnectorConfig;
use tradegate::connection::{ConnectionManager, ConnectionState};
use tradegate::services::{HealthState, HealthStatus, Metrics};

fn manager() -> (ConnectionManager, Arc<Metrics>) {
    let (tx, mut rx) = mpsc::channel(64);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    let metrics = Arc::new(Metrics::new());
    (
        ConnectionManager::new(ConnectorConfig::default(), tx, Arc::clone(&metrics)),
        metrics,
    )
}

async fn wait_for_state(manager: &ConnectionManager, account: &str, target: ConnectionState) {
    let mut rx = manager.registry().subscribe(account).unwrap();
    rx.wait_for(|c| c.state == target).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_until_error() {
    let (manager, _) = manager();
    let transport = ScriptedTransport::unreachable();

    let first = manager.initialize_with_transport("acct", transport.clone()).await;
    assert!(first.is_err());
    assert_eq!(
        manager.registry().state("acct"),
        Some(ConnectionState::Reconnecting)
    );

    wait_for_state(&manager, "acct", ConnectionState::Error).await;

    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 4);
    let gaps: Vec<u128> = attempts
        .windows(2)
        .map(|w| (w[1] - w[0]).as_millis())
        .collect();
    assert_eq!(gaps, vec![1000, 2000, 4000]);

    let conn = manager.registry().snapshot("acct").unwrap();
    assert_eq!(conn.retry_count, 3);
    assert!(conn.last_error.is_some());

    // terminal: no further attempts
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.attempts().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn lost_link_reconnects_and_resets_retries() {
    let (manager, metrics) = manager();
    let transport = ScriptedTransport::new(Reply::Silent);

    let conn = manager
        .initialize_with_transport("acct", transport.clone())
        .await
        .unwrap();
    assert_eq!(conn.state, ConnectionState::Connected);
    assert!(conn.last_heartbeat.is_some());

    transport.drop_link();
    wait_for_state(&manager, "acct", ConnectionState::Reconnecting).await;
    wait_for_state(&manager, "acct", ConnectionState::Connected).await;

    let conn = manager.registry().snapshot("acct").unwrap();
    assert_eq!(conn.retry_count, 0);
    assert!(conn.last_error.is_none());
    assert_eq!(transport.attempts().len(), 2);
    assert_eq!(metrics.reconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_heartbeat_triggers_reconnect() {
    let (manager, metrics) = manager();
    let transport = ScriptedTransport::new(Reply::Silent);
    manager
        .initialize_with_transport("acct", transport.clone())
        .await
        .unwrap();

    // kill the session without signalling; the next heartbeat notices
    transport.close_quietly();
    wait_for_state(&manager, "acct", ConnectionState::Reconnecting).await;
    assert_eq!(metrics.heartbeat_failures.load(Ordering::SeqCst), 1);
    wait_for_state(&manager, "acct", ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_initialization_is_rejected() {
    let (manager, _) = manager();
    manager
        .initialize_with_transport("acct", ScriptedTransport::new(Reply::Silent))
        .await
        .unwrap();
    let again = manager
        .initialize_with_transport("acct", ScriptedTransport::new(Reply::Silent))
        .await;
    assert_eq!(again.unwrap_err().code(), "ValidationError");
}

#[tokio::test(start_paused = true)]
async fn close_leaves_connection_disconnected() {
    let (manager, _) = manager();
    let transport = ScriptedTransport::new(Reply::Silent);
    manager
        .initialize_with_transport("acct", transport.clone())
        .await
        .unwrap();

    manager.close_connection("acct").await.unwrap();
    assert_eq!(
        manager.registry().state("acct"),
        Some(ConnectionState::Disconnected)
    );
    assert!(manager.registry().connected_transport("acct").is_none());
    assert!(manager.close_connection("missing").await.is_err());
}

#[tokio::test(start_paused = true)]
async fn health_reflects_connection_states() {
    let (manager, metrics) = manager();
    manager
        .initialize_with_transport("good", ScriptedTransport::new(Reply::Silent))
        .await
        .unwrap();
    let health = HealthState::new(Arc::clone(manager.registry()), Arc::clone(&metrics));
    assert_eq!(health.get_health().status, HealthStatus::Healthy);

    let _ = manager
        .initialize_with_transport("flaky", ScriptedTransport::unreachable())
        .await;
    assert_eq!(health.get_health().status, HealthStatus::Degraded);

    wait_for_state(&manager, "flaky", ConnectionState::Error).await;
    let report = health.get_health();
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert_eq!(report.components.len(), 2);
}
