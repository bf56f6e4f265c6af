#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rand::RngCore;
use rust_decimal::Decimal;
use tokio::time::Instant;

use tradegate::domain::{FeatureVector, PolicyKind, TradeCallback, TradeCommand};
use tradegate::error::{Result, TradegateError};
use tradegate::policy::{ConstraintCheck, Policy};
use tradegate::transport::{
    HeartbeatInfo, InboundEvent, InboundMessage, Transport, TransportContext, TransportKind,
};

/// How a scripted agent answers transmitted commands
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Success callback pushed through the inbound channel
    Fill,
    /// Failure callback pushed through the inbound channel
    Reject,
    /// Never answer
    Silent,
}

/// In-memory agent link with scripted handshakes.
pub struct ScriptedTransport {
    kind: TransportKind,
    /// Outcome of each successive `connect`; `true` once exhausted
    handshakes: Mutex<VecDeque<bool>>,
    reply: Mutex<Reply>,
    alive: AtomicBool,
    next_ticket: AtomicUsize,
    ctx: Mutex<Option<TransportContext>>,
    pub connect_attempts: Mutex<Vec<Instant>>,
    pub sent: Mutex<Vec<TradeCommand>>,
    /// Transient send failures to return before succeeding
    pub send_failures: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(reply: Reply) -> Arc<Self> {
        Self::with_handshakes(reply, [])
    }

    pub fn with_handshakes(reply: Reply, outcomes: impl IntoIterator<Item = bool>) -> Arc<Self> {
        Arc::new(Self {
            kind: TransportKind::WebSocket,
            handshakes: Mutex::new(outcomes.into_iter().collect()),
            reply: Mutex::new(reply),
            alive: AtomicBool::new(false),
            next_ticket: AtomicUsize::new(1000),
            ctx: Mutex::new(None),
            connect_attempts: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            send_failures: AtomicUsize::new(0),
        })
    }

    /// Every handshake fails
    pub fn unreachable() -> Arc<Self> {
        Self::with_handshakes(Reply::Silent, std::iter::repeat(false).take(64))
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.connect_attempts.lock().unwrap().clone()
    }

    /// Drop the session as a remote close would.
    pub fn drop_link(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(ctx) = self.ctx.lock().unwrap().as_ref() {
            ctx.link_lost.notify_one();
        }
    }

    /// Lose the session without telling anyone.
    pub fn close_quietly(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Push a message as if the agent sent it.
    pub async fn push(&self, message: InboundMessage) {
        let ctx = self.ctx.lock().unwrap().clone();
        if let Some(ctx) = ctx {
            let _ = ctx.inbound.send(InboundEvent::new(ctx.account_id.clone(), message)).await;
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn endpoint(&self) -> &str {
        "ws://agent.test/ws"
    }

    async fn connect(&self, ctx: TransportContext) -> Result<()> {
        self.connect_attempts.lock().unwrap().push(Instant::now());
        let ok = self.handshakes.lock().unwrap().pop_front().unwrap_or(true);
        if !ok {
            return Err(TradegateError::Connection("agent refused handshake".into()));
        }
        *self.ctx.lock().unwrap() = Some(ctx);
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn heartbeat(&self) -> Result<HeartbeatInfo> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(HeartbeatInfo::default())
        } else {
            Err(TradegateError::Connection("no session".into()))
        }
    }

    async fn send_command(&self, command: &TradeCommand) -> Result<()> {
        if self
            .send_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TradegateError::Connection("write failed".into()));
        }
        self.sent.lock().unwrap().push(command.clone());

        let reply = *self.reply.lock().unwrap();
        let callback = match reply {
            Reply::Silent => return Ok(()),
            Reply::Fill => TradeCallback {
                request_id: command.correlation_id.clone(),
                success: true,
                ticket: Some(self.next_ticket.fetch_add(1, Ordering::SeqCst) as u64),
                execution_price: Some(Decimal::new(11000, 4)),
                error: None,
                timestamp: Utc::now(),
            },
            Reply::Reject => TradeCallback {
                request_id: command.correlation_id.clone(),
                success: false,
                ticket: None,
                execution_price: None,
                error: Some("market closed".into()),
                timestamp: Utc::now(),
            },
        };
        self.push(InboundMessage::Callback(callback)).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Policy with a fixed distribution, optionally failing or reporting a
/// violation probability.
pub struct FixedPolicy {
    id: String,
    kind: PolicyKind,
    probs: Vec<f64>,
    violation: Option<(f64, f64)>,
    broken: bool,
}

impl FixedPolicy {
    pub fn new(id: &str, kind: PolicyKind, probs: [f64; 3]) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            probs: probs.to_vec(),
            violation: None,
            broken: false,
        })
    }

    /// Constrained policy reporting `probability` against `threshold`
    pub fn constrained(id: &str, probs: [f64; 3], probability: f64, threshold: f64) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind: PolicyKind::Constrained,
            probs: probs.to_vec(),
            violation: Some((probability, threshold)),
            broken: false,
        })
    }

    pub fn broken(id: &str, kind: PolicyKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            probs: vec![1.0, 0.0, 0.0],
            violation: None,
            broken: true,
        })
    }
}

impl Policy for FixedPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> PolicyKind {
        self.kind
    }

    fn input_dim(&self) -> usize {
        FEATURES
    }

    fn action_probabilities(&self, _features: &FeatureVector) -> Result<Vec<f64>> {
        if self.broken {
            return Err(TradegateError::Model(format!("{} weights corrupted", self.id)));
        }
        Ok(self.probs.clone())
    }

    fn stochastic_action_probabilities(
        &self,
        features: &FeatureVector,
        _rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        self.action_probabilities(features)
    }

    fn state_value(&self, _features: &FeatureVector) -> Result<f64> {
        Ok(0.25)
    }

    fn constraint_checker(&self) -> Option<&dyn ConstraintCheck> {
        self.violation.map(|_| self as &dyn ConstraintCheck)
    }
}

impl ConstraintCheck for FixedPolicy {
    fn constraint_violation_probability(&self, _features: &FeatureVector) -> Result<f64> {
        Ok(self.violation.map(|(p, _)| p).unwrap_or(0.0))
    }

    fn threshold(&self) -> f64 {
        self.violation.map(|(_, t)| t).unwrap_or(0.5)
    }
}

pub const FEATURES: usize = 4;

pub fn features() -> FeatureVector {
    FeatureVector::new(vec![0.1; FEATURES]).unwrap()
}
