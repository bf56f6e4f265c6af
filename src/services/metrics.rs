use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

/// Metrics collector for the decision and execution core
#[derive(Debug)]
pub struct Metrics {
    /// Ticks that produced a trading action
    pub decisions: AtomicU64,
    /// Ticks skipped because no policy produced an output
    pub no_prediction: AtomicU64,
    /// Commands handed to a transport
    pub dispatched: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
    pub risk_rejections: AtomicU64,
    /// Callbacks with unknown or already-resolved ids
    pub callback_mismatches: AtomicU64,
    pub reconnects: AtomicU64,
    pub heartbeat_failures: AtomicU64,
    started_at: DateTime<Utc>,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub decisions: u64,
    pub no_prediction: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub risk_rejections: u64,
    pub callback_mismatches: u64,
    pub reconnects: u64,
    pub heartbeat_failures: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            decisions: AtomicU64::new(0),
            no_prediction: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            risk_rejections: AtomicU64::new(0),
            callback_mismatches: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            heartbeat_failures: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            decisions: load(&self.decisions),
            no_prediction: load(&self.no_prediction),
            dispatched: load(&self.dispatched),
            succeeded: load(&self.succeeded),
            failed: load(&self.failed),
            timed_out: load(&self.timed_out),
            risk_rejections: load(&self.risk_rejections),
            callback_mismatches: load(&self.callback_mismatches),
            reconnects: load(&self.reconnects),
            heartbeat_failures: load(&self.heartbeat_failures),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// One-line status for periodic logging
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "decisions={} no_prediction={} dispatched={} ok={} failed={} timeout={} risk_rejected={} mismatched={} reconnects={} hb_failures={}",
            s.decisions,
            s.no_prediction,
            s.dispatched,
            s.succeeded,
            s.failed,
            s.timed_out,
            s.risk_rejections,
            s.callback_mismatches,
            s.reconnects,
            s.heartbeat_failures,
        )
    }

    /// Export counters in Prometheus text format
    pub fn prometheus(&self, pending_commands: usize, connected_accounts: usize) -> String {
        let s = self.snapshot();
        let mut out = String::new();
        let counters: [(&str, &str, u64); 10] = [
            ("decisions_total", "Ticks that produced a trading action", s.decisions),
            ("no_prediction_total", "Ticks skipped without a prediction", s.no_prediction),
            ("commands_dispatched_total", "Commands handed to a transport", s.dispatched),
            ("commands_succeeded_total", "Commands confirmed by the agent", s.succeeded),
            ("commands_failed_total", "Commands that failed", s.failed),
            ("commands_timed_out_total", "Commands without a callback in time", s.timed_out),
            ("risk_rejections_total", "Commands rejected by the risk gate", s.risk_rejections),
            ("callback_mismatches_total", "Unknown or duplicate callbacks", s.callback_mismatches),
            ("reconnects_total", "Successful reconnects", s.reconnects),
            ("heartbeat_failures_total", "Failed heartbeats", s.heartbeat_failures),
        ];
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP tradegate_{name} {help}\n# TYPE tradegate_{name} counter\ntradegate_{name} {value}\n\n"
            ));
        }
        out.push_str(&format!(
            "# HELP tradegate_pending_commands Commands awaiting a callback\n# TYPE tradegate_pending_commands gauge\ntradegate_pending_commands {pending_commands}\n\n"
        ));
        out.push_str(&format!(
            "# HELP tradegate_connected_accounts Accounts with a live connection\n# TYPE tradegate_connected_accounts gauge\ntradegate_connected_accounts {connected_accounts}\n"
        ));
        out
    }

    /// Log `summary()` every `interval` until `stop` flips to true.
    pub fn spawn_reporter(
        self: &Arc<Self>,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => info!(target: "tradegate::metrics", "{}", metrics.summary()),
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exports() {
        let metrics = Metrics::new();
        Metrics::inc(&metrics.dispatched);
        Metrics::inc(&metrics.dispatched);
        Metrics::inc(&metrics.timed_out);

        let snap = metrics.snapshot();
        assert_eq!(snap.dispatched, 2);
        assert_eq!(snap.timed_out, 1);

        let text = metrics.prometheus(3, 1);
        assert!(text.contains("tradegate_commands_dispatched_total 2"));
        assert!(text.contains("tradegate_pending_commands 3"));
        assert!(metrics.summary().contains("timeout=1"));
    }
}
