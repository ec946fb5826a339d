//! Food-delivery marketplace adapter.
//!
//! The marketplace has no partner API; the adapter replays the partner web
//! portal's session flow over HTTP. Session state (cookies and the portal's
//! local-state values) is persisted to `session_path` and reused across
//! fetches. When it is absent or rejected the adapter performs one full
//! login per fetch, waiting on the operator-filled one-time-code file if the
//! portal asks for a second factor. Logins are serialized per adapter.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use kassa_config::secrets::LoginSecret;
use kassa_config::MarketplaceSettings;
use kassa_schemas::SourceKind;
use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::adapter::{amount_field, SourceAdapter, SourceFetch, SourceRequest};
use crate::error::SourceError;

/// Terminal credential: the marketplace's place id for this terminal.
pub const PLACE_ID_KEY: &str = "yandex_place_id";
const CSRF_KEY: &str = "csrf_token";

/// Browser-equivalent session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub local_state: BTreeMap<String, String>,
}

impl SessionState {
    fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Take every `Set-Cookie` of a response.
    fn absorb_cookies(&mut self, headers: &HeaderMap) {
        for raw in headers.get_all(SET_COOKIE) {
            let Ok(raw) = raw.to_str() else { continue };
            let pair = raw.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    self.cookies.insert(name.to_string(), value.trim().to_string());
                }
            }
        }
    }

    fn absorb_body(&mut self, body: &Value) {
        if let Some(csrf) = body.get(CSRF_KEY).and_then(Value::as_str) {
            self.local_state.insert(CSRF_KEY.to_string(), csrf.to_string());
        }
    }
}

pub struct MarketplaceAdapter {
    http: reqwest::Client,
    base_url: String,
    secret: LoginSecret,
    timeout: Duration,
    session_path: PathBuf,
    otp_path: PathBuf,
    otp_poll: Duration,
    otp_wait: Duration,
    session: Mutex<Option<SessionState>>,
    login_lock: Mutex<()>,
}

impl MarketplaceAdapter {
    pub fn new(settings: &MarketplaceSettings, secret: LoginSecret) -> Result<Self, SourceError> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Config(format!("marketplace: http client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            secret,
            timeout,
            session_path: PathBuf::from(&settings.session_path),
            otp_path: PathBuf::from(&settings.otp_path),
            otp_poll: Duration::from_millis(settings.otp_poll_millis.max(1)),
            otp_wait: Duration::from_secs(settings.otp_wait_secs),
            session: Mutex::new(None),
            login_lock: Mutex::new(()),
        })
    }

    async fn current_session(&self) -> Option<SessionState> {
        let mut s = self.session.lock().await;
        if s.is_none() {
            *s = load_session(&self.session_path).await;
        }
        s.clone()
    }

    /// Log in unless another fetch already replaced the rejected session.
    async fn relogin(&self, rejected: Option<&SessionState>) -> Result<SessionState, SourceError> {
        let _serialized = self.login_lock.lock().await;
        {
            let s = self.session.lock().await;
            if let Some(current) = s.as_ref() {
                if Some(current) != rejected {
                    return Ok(current.clone());
                }
            }
        }

        let state = self.login().await?;
        if let Err(e) = save_session(&self.session_path, &state).await {
            tracing::warn!(error = %e, path = ?self.session_path, "marketplace session not persisted");
        }
        *self.session.lock().await = Some(state.clone());
        Ok(state)
    }

    async fn login(&self) -> Result<SessionState, SourceError> {
        tracing::info!("marketplace: full login");
        // A code left over from an earlier login must not be replayed.
        clear_otp(&self.otp_path).await;

        let mut state = SessionState::default();
        let resp = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&json!({"login": self.secret.login, "password": self.secret.password}))
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest("marketplace login", &e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::from_status("marketplace login", status));
        }
        state.absorb_cookies(resp.headers());
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(format!("marketplace login: {e}")))?;
        state.absorb_body(&body);

        match body.get("status").and_then(Value::as_str) {
            Some("ok") => {}
            Some("otp_required") => {
                let challenge = body
                    .get("challenge_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let code = self.wait_for_otp().await?;
                self.submit_otp(&mut state, &challenge, &code).await?;
            }
            other => {
                return Err(SourceError::Auth(format!(
                    "marketplace login: unexpected status {other:?}"
                )))
            }
        }

        if state.cookies.is_empty() {
            return Err(SourceError::Auth("marketplace login: no session cookie issued".into()));
        }
        Ok(state)
    }

    async fn submit_otp(&self, state: &mut SessionState, challenge: &str, code: &str) -> Result<(), SourceError> {
        let resp = self
            .http
            .post(format!("{}/api/auth/otp", self.base_url))
            .header(COOKIE, state.cookie_header())
            .json(&json!({"challenge_id": challenge, "code": code}))
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest("marketplace otp", &e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Auth(format!(
                "marketplace one-time code rejected (HTTP {status})"
            )));
        }
        state.absorb_cookies(resp.headers());
        if let Ok(body) = resp.json::<Value>().await {
            state.absorb_body(&body);
        }
        Ok(())
    }

    /// Poll the side-channel file until an operator writes the code into it.
    async fn wait_for_otp(&self) -> Result<String, SourceError> {
        tracing::warn!(path = ?self.otp_path, wait_secs = self.otp_wait.as_secs(), "marketplace: waiting for one-time code");
        let deadline = Instant::now() + self.otp_wait;
        loop {
            let code = match tokio::fs::read_to_string(&self.otp_path).await {
                Ok(s) => s.trim().to_string(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => {
                    return Err(SourceError::Config(format!(
                        "marketplace: cannot read one-time code file: {e}"
                    )))
                }
            };
            if !code.is_empty() {
                clear_otp(&self.otp_path).await;
                return Ok(code);
            }
            if Instant::now() >= deadline {
                return Err(SourceError::Auth(format!(
                    "marketplace: one-time code not provided within {}s",
                    self.otp_wait.as_secs()
                )));
            }
            tokio::time::sleep(self.otp_poll).await;
        }
    }

    async fn fetch_reimbursements(
        &self,
        state: &SessionState,
        place_id: &str,
        req: &SourceRequest,
    ) -> Result<i64, SourceError> {
        let (from, to) = req.window.local_bounds();
        let mut call = self
            .http
            .get(format!("{}/api/v1/finance/transactions", self.base_url))
            .header(COOKIE, state.cookie_header())
            .query(&[
                ("place_id", place_id),
                ("date_from", from.as_str()),
                ("date_to", to.as_str()),
            ]);
        if let Some(csrf) = state.local_state.get(CSRF_KEY) {
            call = call.header("x-csrf-token", csrf);
        }
        let resp = call
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest("marketplace transactions", &e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::from_status("marketplace transactions", status));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(format!("marketplace transactions: {e}")))?;
        sum_reimbursements(&body)
    }
}

#[async_trait]
impl SourceAdapter for MarketplaceAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Marketplace
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, req: &SourceRequest) -> Result<SourceFetch, SourceError> {
        let place_id = req.terminal_key(SourceKind::Marketplace, PLACE_ID_KEY)?;

        let persisted = self.current_session().await;
        if let Some(state) = &persisted {
            match self.fetch_reimbursements(state, place_id, req).await {
                Ok(total) => return Ok(SourceFetch::income(SourceKind::Marketplace, total)),
                Err(SourceError::Auth(msg)) => {
                    tracing::info!(terminal_id = %req.terminal.id, reason = %msg, "marketplace session rejected");
                }
                Err(e) => return Err(e),
            }
        }

        let state = self.relogin(persisted.as_ref()).await?;
        let total = self.fetch_reimbursements(&state, place_id, req).await?;
        Ok(SourceFetch::income(SourceKind::Marketplace, total))
    }
}

/// Sum entries flagged as reimbursements to the business.
fn sum_reimbursements(body: &Value) -> Result<i64, SourceError> {
    let list = body
        .get("transactions")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Decode("marketplace transactions: no 'transactions' list".into()))?;
    let mut total = 0;
    for tx in list {
        if tx.get("is_reimbursement").and_then(Value::as_bool) == Some(true) {
            total += amount_field(tx, "amount", "marketplace transaction")?;
        }
    }
    Ok(total)
}

async fn load_session(path: &Path) -> Option<SessionState> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str::<SessionState>(&raw) {
        Ok(s) if !s.cookies.is_empty() => Some(s),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, path = ?path, "marketplace session file unreadable, ignoring");
            None
        }
    }
}

async fn save_session(path: &Path, state: &SessionState) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let body = serde_json::to_vec_pretty(state).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn clear_otp(path: &Path) {
    if tokio::fs::metadata(path).await.is_err() {
        return;
    }
    if let Err(e) = tokio::fs::write(path, b"").await {
        tracing::warn!(error = %e, path = ?path, "cannot truncate one-time code file");
    }
}
