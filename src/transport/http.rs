//! Request/response transport against the agent's HTTP endpoints:
//! `GET /ping`, `GET /heartbeat`, `POST /trade`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Response};
use tracing::{debug, warn};

use super::envelope::{HeartbeatInfo, InboundEvent, InboundMessage};
use super::traits::{Transport, TransportContext, TransportKind};
use crate::domain::{TradeCallback, TradeCommand};
use crate::error::{Result, TradegateError};

const REQUEST_ID_HEADER: &str = "x-request-id";
const ACCOUNT_ID_HEADER: &str = "x-account-id";
const API_KEY_HEADER: &str = "x-api-key";

pub struct HttpTransport {
    http: Client,
    base_url: String,
    account_id: String,
    api_key: Option<String>,
    ctx: RwLock<Option<TransportContext>>,
    alive: AtomicBool,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        account_id: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("tradegate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TradegateError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id: account_id.into(),
            api_key,
            ctx: RwLock::new(None),
            alive: AtomicBool::new(false),
        })
    }

    fn headers(&self, request_id: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(ACCOUNT_ID_HEADER),
            header_value(&self.account_id)?,
        );
        if let Some(id) = request_id {
            headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), header_value(id)?);
        }
        if let Some(key) = &self.api_key {
            headers.insert(HeaderName::from_static(API_KEY_HEADER), header_value(key)?);
        }
        Ok(headers)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        request_id: Option<&str>,
        body: Option<String>,
    ) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .headers(self.headers(request_id)?);
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                if e.is_connect() || e.is_timeout() {
                    self.mark_lost(&format!("{} {}: {}", method, path, e));
                }
                return Err(e.into());
            }
        };
        read_body(resp).await
    }

    fn mark_lost(&self, reason: &str) {
        if self.alive.swap(false, Ordering::SeqCst) {
            warn!(account = %self.account_id, reason, "agent link lost");
            if let Some(ctx) = self.context() {
                ctx.link_lost.notify_one();
            }
        }
    }

    fn context(&self) -> Option<TransportContext> {
        self.ctx.read().ok().and_then(|g| g.clone())
    }
}

async fn read_body(resp: Response) -> Result<String> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(TradegateError::HttpStatus {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(text)
}

fn header_value(v: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(v).map_err(|e| TradegateError::Validation(format!("invalid header value: {}", e)))
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn connect(&self, ctx: TransportContext) -> Result<()> {
        if let Ok(mut slot) = self.ctx.write() {
            *slot = Some(ctx);
        }
        self.request(Method::GET, "/ping", None, None).await?;
        self.alive.store(true, Ordering::SeqCst);
        debug!(account = %self.account_id, endpoint = %self.base_url, "agent ping ok");
        Ok(())
    }

    async fn heartbeat(&self) -> Result<HeartbeatInfo> {
        let text = self.request(Method::GET, "/heartbeat", None, None).await?;
        let info = if text.trim().is_empty() {
            HeartbeatInfo::default()
        } else {
            serde_json::from_str(&text).unwrap_or_default()
        };
        self.alive.store(true, Ordering::SeqCst);
        Ok(info)
    }

    async fn send_command(&self, command: &TradeCommand) -> Result<()> {
        if !self.is_alive() {
            return Err(TradegateError::Connection(format!(
                "{} is not connected",
                self.account_id
            )));
        }

        let body = serde_json::to_string(command)?;
        let text = self
            .request(
                Method::POST,
                "/trade",
                Some(&command.correlation_id),
                Some(body),
            )
            .await?;

        // A synchronous agent answers with the execution result; an async
        // one acknowledges and reports later via push or webhook.
        match serde_json::from_str::<TradeCallback>(&text) {
            Ok(callback) => {
                if let Some(ctx) = self.context() {
                    let event = InboundEvent::new(
                        self.account_id.clone(),
                        InboundMessage::Callback(callback),
                    );
                    if ctx.inbound.send(event).await.is_err() {
                        warn!(account = %self.account_id, "inbound channel closed; callback dropped");
                    }
                }
            }
            Err(_) => debug!(
                account = %self.account_id,
                correlation_id = %command.correlation_id,
                "trade acknowledged without inline result"
            ),
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.ctx.write() {
            *slot = None;
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
