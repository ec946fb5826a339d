//! Click-gateway adapter over a stateful WebSocket session.
//!
//! One session per fetch: log in, then request each configured sub-service
//! report strictly one after another, then close. Upstream may split a JSON
//! message across several text frames; [`FrameBuffer`] reassembles them.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use kassa_config::secrets::LoginSecret;
use kassa_config::ClickSettings;
use kassa_schemas::SourceKind;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::adapter::{amount_field, SourceAdapter, SourceFetch, SourceRequest};
use crate::error::SourceError;

/// Terminal credential: comma-separated sub-service ids.
pub const SERVICE_IDS_KEY: &str = "click_service_ids";

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct ClickAdapter {
    ws_url: String,
    secret: LoginSecret,
    timeout: Duration,
}

impl ClickAdapter {
    pub fn new(settings: &ClickSettings, secret: LoginSecret) -> Self {
        Self {
            ws_url: settings.ws_url.clone(),
            secret,
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

#[async_trait]
impl SourceAdapter for ClickAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::ClickGateway
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, req: &SourceRequest) -> Result<SourceFetch, SourceError> {
        let service_ids = parse_service_ids(req.terminal_key(SourceKind::ClickGateway, SERVICE_IDS_KEY)?);
        if service_ids.is_empty() {
            return Err(SourceError::Config(format!(
                "click: no sub-service ids for terminal '{}'",
                req.terminal.id
            )));
        }

        let (ws, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| SourceError::Unavailable(format!("click connect: {e}")))?;
        let mut session = Session {
            ws,
            buf: FrameBuffer::default(),
            next_id: 1,
        };

        let result = session.run(&self.secret, &service_ids, req).await;
        // Close regardless of outcome; a failed close changes nothing.
        let _ = session.ws.close(None).await;
        let total = result?;

        tracing::debug!(terminal_id = %req.terminal.id, services = service_ids.len(), total, "click report summed");
        Ok(SourceFetch::income(SourceKind::ClickGateway, total))
    }
}

fn parse_service_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

struct Session {
    ws: Socket,
    buf: FrameBuffer,
    next_id: u64,
}

impl Session {
    async fn run(
        &mut self,
        secret: &LoginSecret,
        service_ids: &[String],
        req: &SourceRequest,
    ) -> Result<i64, SourceError> {
        let login = self
            .call(
                "auth.login",
                json!({"login": secret.login, "password": secret.password}),
            )
            .await?;
        let token = login
            .get("session")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Decode("click login: no session in result".into()))?
            .to_string();

        let (from, to) = req.window.local_bounds();
        let mut total = 0i64;
        for sid in service_ids {
            let result = self
                .call(
                    "report.service_total",
                    json!({
                        "session": token,
                        "service_id": sid,
                        "date_from": from,
                        "date_to": to,
                    }),
                )
                .await?;
            total += amount_field(&result, "total", "click report")?;
        }
        Ok(total)
    }

    /// Send one request and wait for the response carrying the same id.
    async fn call(&mut self, method: &str, params: Value) -> Result<Value, SourceError> {
        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({"id": id, "method": method, "params": params}).to_string();
        self.ws
            .send(Message::Text(frame))
            .await
            .map_err(|e| SourceError::Unavailable(format!("click send: {e}")))?;

        loop {
            let msg = self.read_message().await?;
            if msg.get("id").and_then(Value::as_u64) != Some(id) {
                // Unsolicited notification.
                continue;
            }
            if let Some(err) = msg.get("error") {
                let text = err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(if method == "auth.login" {
                    SourceError::Auth(format!("click login rejected: {text}"))
                } else {
                    SourceError::Unavailable(format!("click {method}: {text}"))
                });
            }
            return msg
                .get("result")
                .cloned()
                .ok_or_else(|| SourceError::Decode(format!("click {method}: response without result")));
        }
    }

    async fn read_message(&mut self) -> Result<Value, SourceError> {
        loop {
            let frame = self
                .ws
                .next()
                .await
                .ok_or_else(|| SourceError::Unavailable("click: connection closed".into()))?
                .map_err(|e| SourceError::Unavailable(format!("click read: {e}")))?;
            let chunk = match frame {
                Message::Text(s) => s,
                Message::Binary(b) => String::from_utf8(b)
                    .map_err(|_| SourceError::Decode("click: non-utf8 binary frame".into()))?,
                Message::Close(_) => {
                    return Err(SourceError::Unavailable("click: server closed the session".into()))
                }
                _ => continue,
            };
            if let Some(v) = self.buf.push(&chunk)? {
                return Ok(v);
            }
        }
    }
}

/// Accumulates text frames until the buffer parses as one JSON value.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: String,
}

impl FrameBuffer {
    /// `Ok(None)` while the message is still incomplete. A buffer that can
    /// never become valid JSON is a decode error and is discarded.
    pub fn push(&mut self, chunk: &str) -> Result<Option<Value>, SourceError> {
        self.buf.push_str(chunk);
        if self.buf.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<Value>(&self.buf) {
            Ok(v) => {
                self.buf.clear();
                Ok(Some(v))
            }
            Err(e) if e.is_eof() => Ok(None),
            Err(e) => {
                self.buf.clear();
                Err(SourceError::Decode(format!("click: malformed message: {e}")))
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
