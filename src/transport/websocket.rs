//! Persistent push transport.
//!
//! One session task per connect: it owns the socket, forwards outbound
//! frames, answers pings, decodes envelopes into inbound events, and
//! signals `link_lost` when the session ends without a local close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::envelope::{Envelope, HeartbeatInfo, InboundEvent, InboundMessage};
use super::traits::{Transport, TransportContext, TransportKind};
use crate::domain::TradeCommand;
use crate::error::{Result, TradegateError};

const OUTBOUND_BUFFER: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsSettings {
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    /// Session is considered dead after this long without any inbound frame
    pub stale_after: Duration,
}

#[derive(Default)]
struct Session {
    outbound: Option<mpsc::Sender<Message>>,
    task: Option<JoinHandle<()>>,
}

pub struct WsTransport {
    url: String,
    account_id: String,
    api_key: Option<String>,
    settings: WsSettings,
    session: Mutex<Session>,
    alive: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    last_seen: Arc<Mutex<Instant>>,
    last_info: Arc<Mutex<HeartbeatInfo>>,
}

impl WsTransport {
    pub fn new(
        url: &str,
        account_id: impl Into<String>,
        api_key: Option<String>,
        settings: WsSettings,
    ) -> Result<Self> {
        Url::parse(url).map_err(|e| TradegateError::InvalidConfig(format!("invalid WebSocket URL {url}: {e}")))?;
        Ok(Self {
            url: url.to_string(),
            account_id: account_id.into(),
            api_key,
            settings,
            session: Mutex::new(Session::default()),
            alive: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            last_seen: Arc::new(Mutex::new(Instant::now())),
            last_info: Arc::new(Mutex::new(HeartbeatInfo::default())),
        })
    }

    fn outbound(&self) -> Option<mpsc::Sender<Message>> {
        self.session.lock().ok().and_then(|s| s.outbound.clone())
    }

    async fn push(&self, envelope: &Envelope) -> Result<()> {
        let text = serde_json::to_string(envelope)?;
        let tx = self
            .outbound()
            .ok_or_else(|| TradegateError::Connection(format!("{} has no session", self.account_id)))?;
        tx.send(Message::Text(text))
            .await
            .map_err(|_| TradegateError::Connection(format!("{} session closed", self.account_id)))
    }

    fn abort_session(&self) {
        if let Ok(mut s) = self.session.lock() {
            s.outbound = None;
            if let Some(task) = s.task.take() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&self, ctx: TransportContext) -> Result<()> {
        self.abort_session();
        self.closing.store(false, Ordering::SeqCst);

        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "x-account-id",
            HeaderValue::from_str(&self.account_id)
                .map_err(|e| TradegateError::Validation(format!("invalid account id header: {e}")))?,
        );
        if let Some(key) = &self.api_key {
            headers.insert(
                "x-api-key",
                HeaderValue::from_str(key)
                    .map_err(|e| TradegateError::Validation(format!("invalid api key header: {e}")))?,
            );
        }

        let (stream, _) = timeout(self.settings.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                TradegateError::TransportTimeout(format!(
                    "WebSocket handshake with {} exceeded {:?}",
                    self.url, self.settings.connect_timeout
                ))
            })??;

        info!(account = %self.account_id, url = %self.url, "WebSocket connected");

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
        if let Ok(mut last) = self.last_seen.lock() {
            *last = Instant::now();
        }
        self.alive.store(true, Ordering::SeqCst);

        let runner = SessionRunner {
            ctx,
            settings: self.settings.clone(),
            alive: Arc::clone(&self.alive),
            closing: Arc::clone(&self.closing),
            last_seen: Arc::clone(&self.last_seen),
            last_info: Arc::clone(&self.last_info),
        };
        let task = tokio::spawn(runner.run(stream, out_rx));

        if let Ok(mut s) = self.session.lock() {
            s.outbound = Some(out_tx);
            s.task = Some(task);
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<HeartbeatInfo> {
        if !self.is_alive() {
            return Err(TradegateError::Connection(format!(
                "{} session is down",
                self.account_id
            )));
        }

        let silent_for = self
            .last_seen
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        if silent_for > self.settings.stale_after {
            return Err(TradegateError::TransportTimeout(format!(
                "no frames from {} for {:?}",
                self.account_id, silent_for
            )));
        }

        self.push(&Envelope::heartbeat(&self.account_id)).await?;
        Ok(self.last_info.lock().map(|i| i.clone()).unwrap_or_default())
    }

    async fn send_command(&self, command: &TradeCommand) -> Result<()> {
        if !self.is_alive() {
            return Err(TradegateError::Connection(format!(
                "{} is not connected",
                self.account_id
            )));
        }
        self.push(&Envelope::command(command)?).await
    }

    async fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(tx) = self.outbound() {
            let _ = tx.send(Message::Close(None)).await;
        }
        self.alive.store(false, Ordering::SeqCst);

        let task = self.session.lock().ok().and_then(|mut s| {
            s.outbound = None;
            s.task.take()
        });
        if let Some(task) = task {
            let abort = task.abort_handle();
            if timeout(CLOSE_GRACE, task).await.is_err() {
                abort.abort();
            }
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

struct SessionRunner {
    ctx: TransportContext,
    settings: WsSettings,
    alive: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    last_seen: Arc<Mutex<Instant>>,
    last_info: Arc<Mutex<HeartbeatInfo>>,
}

impl SessionRunner {
    async fn run(self, stream: WsStream, mut out_rx: mpsc::Receiver<Message>) {
        let (mut write, mut read) = stream.split();
        let mut ping_interval = interval(self.settings.ping_interval);
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason: String = loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.touch();
                            self.dispatch(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.touch();
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break format!("pong failed: {e}");
                            }
                        }
                        Some(Ok(Message::Close(_))) => break "remote close".to_string(),
                        Some(Ok(_)) => self.touch(),
                        Some(Err(e)) => break format!("read error: {e}"),
                        None => break "stream ended".to_string(),
                    }
                }
                out = out_rx.recv() => {
                    match out {
                        Some(frame) => {
                            let is_close = matches!(frame, Message::Close(_));
                            if let Err(e) = write.send(frame).await {
                                break format!("write error: {e}");
                            }
                            if is_close {
                                break "local close".to_string();
                            }
                        }
                        None => break "outbound channel dropped".to_string(),
                    }
                }
                _ = ping_interval.tick() => {
                    let silent_for = self.last_seen.lock().map(|t| t.elapsed()).unwrap_or_default();
                    if silent_for > self.settings.stale_after {
                        break format!("stale for {silent_for:?}");
                    }
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        break format!("ping failed: {e}");
                    }
                }
            }
        };

        self.alive.store(false, Ordering::SeqCst);
        if self.closing.load(Ordering::SeqCst) {
            debug!(account = %self.ctx.account_id, "WebSocket session closed locally");
        } else {
            warn!(account = %self.ctx.account_id, reason = %reason, "WebSocket session lost");
            self.ctx.link_lost.notify_one();
        }
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_seen.lock() {
            *last = Instant::now();
        }
    }

    async fn dispatch(&self, text: &str) {
        let decoded = serde_json::from_str::<Envelope>(text)
            .map_err(TradegateError::from)
            .and_then(Envelope::into_inbound);

        let message = match decoded {
            Ok(m) => m,
            Err(e) => {
                let preview: String = text.chars().take(200).collect();
                warn!(account = %self.ctx.account_id, error = %e, preview = %preview, "undecodable frame");
                return;
            }
        };

        if let InboundMessage::Heartbeat(info) = &message {
            if let Ok(mut last) = self.last_info.lock() {
                *last = info.clone();
            }
        }

        let event = InboundEvent::new(self.ctx.account_id.clone(), message);
        if self.ctx.inbound.send(event).await.is_err() {
            debug!(account = %self.ctx.account_id, "inbound channel closed");
        }
    }
}
