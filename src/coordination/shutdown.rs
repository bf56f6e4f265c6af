//! Graceful shutdown
//!
//! Phases: stop accepting commands, drain in-flight commands, cancel the
//! rest, close every connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::dispatch::Dispatcher;

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for pending commands to resolve (default: 10s)
    pub drain_timeout: Duration,
    /// Time to wait for transports to close (default: 5s)
    pub close_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    StoppingNewCommands,
    DrainingCommands,
    CancellingCommands,
    ClosingConnections,
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingNewCommands => write!(f, "stopping_new_commands"),
            ShutdownPhase::DrainingCommands => write!(f, "draining_commands"),
            ShutdownPhase::CancellingCommands => write!(f, "cancelling_commands"),
            ShutdownPhase::ClosingConnections => write!(f, "closing_connections"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Summary of one shutdown run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub drained: bool,
    pub cancelled: usize,
}

pub struct GracefulShutdown {
    config: ShutdownConfig,
    requested: AtomicBool,
    phase: watch::Sender<ShutdownPhase>,
    /// Flips to true once shutdown is requested; background tasks watch it
    stop: watch::Sender<bool>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        let (stop, _) = watch::channel(false);
        Self {
            config,
            requested: AtomicBool::new(false),
            phase,
            stop,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Receiver that turns true when shutdown is requested
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Returns false when shutdown was already requested
    pub fn request_shutdown(&self, reason: &str) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            warn!(reason, "shutdown already requested");
            return false;
        }
        info!(reason, "shutdown requested");
        self.stop.send_replace(true);
        true
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.send_replace(phase);
        info!(phase = %phase, "shutdown phase");
    }

    /// Run every phase in order. Safe to call once per process.
    pub async fn execute(&self, dispatcher: &Dispatcher, connections: &ConnectionManager) -> ShutdownReport {
        self.request_shutdown("execute");
        let start = tokio::time::Instant::now();

        self.set_phase(ShutdownPhase::StoppingNewCommands);
        dispatcher.stop_accepting();

        self.set_phase(ShutdownPhase::DrainingCommands);
        let drained = dispatcher.drain(self.config.drain_timeout).await;
        if drained {
            debug!("all pending commands resolved");
        } else {
            warn!(
                pending = dispatcher.pending_count(),
                timeout = ?self.config.drain_timeout,
                "drain timed out"
            );
        }

        self.set_phase(ShutdownPhase::CancellingCommands);
        let cancelled = dispatcher.cancel_all();

        self.set_phase(ShutdownPhase::ClosingConnections);
        if tokio::time::timeout(self.config.close_timeout, connections.close_all())
            .await
            .is_err()
        {
            warn!(timeout = ?self.config.close_timeout, "connection close timed out");
        }

        self.set_phase(ShutdownPhase::Complete);
        info!(elapsed = ?start.elapsed(), cancelled, "shutdown complete");
        ShutdownReport { drained, cancelled }
    }
}

/// Request shutdown on SIGINT or SIGTERM.
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.request_shutdown("signal");
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, using Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = term.recv() => info!("received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received Ctrl+C");
    }
}
