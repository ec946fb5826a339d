//! POS cashier adapter: sums closed cash shifts of the terminal's POS group.

use std::time::Duration;

use async_trait::async_trait;
use kassa_config::secrets::LoginSecret;
use kassa_config::PosSettings;
use kassa_schemas::{PosSummary, SourceKind};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::adapter::{amount_field, SourceAdapter, SourceFetch, SourceRequest};
use crate::error::SourceError;

pub struct PosAdapter {
    http: reqwest::Client,
    base_url: String,
    secret: LoginSecret,
    timeout: Duration,
    /// API token from the last login; reused until rejected. Locked only
    /// while reading it or logging in.
    token: Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

impl PosAdapter {
    pub fn new(settings: &PosSettings, secret: LoginSecret) -> Result<Self, SourceError> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Config(format!("pos: http client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            secret,
            timeout,
            token: Mutex::new(None),
        })
    }

    async fn login(&self) -> Result<String, SourceError> {
        let resp = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&json!({"login": self.secret.login, "password": self.secret.password}))
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest("pos login", &e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::from_status("pos login", status));
        }
        let body: LoginResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(format!("pos login: {e}")))?;
        Ok(body.token)
    }

    /// Cached token, or a fresh login when nothing is cached or the cached
    /// token is the `rejected` one. The flag is true after a login.
    async fn token(&self, rejected: Option<&str>) -> Result<(String, bool), SourceError> {
        let mut cached = self.token.lock().await;
        if let Some(current) = cached.as_deref() {
            if Some(current) != rejected {
                return Ok((current.to_string(), false));
            }
        }
        let fresh = self.login().await?;
        *cached = Some(fresh.clone());
        Ok((fresh, true))
    }

    async fn list_shifts(&self, token: &str, group_id: &str, req: &SourceRequest) -> Result<Value, SourceError> {
        let (from, to) = req.window.local_bounds();
        let resp = self
            .http
            .get(format!("{}/api/cash-shifts", self.base_url))
            .bearer_auth(token)
            .query(&[
                ("group_id", group_id),
                ("status", "closed"),
                ("from", from.as_str()),
                ("to", to.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest("pos cash-shifts", &e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::from_status("pos cash-shifts", status));
        }
        resp.json()
            .await
            .map_err(|e| SourceError::Decode(format!("pos cash-shifts: {e}")))
    }
}

#[async_trait]
impl SourceAdapter for PosAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Pos
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, req: &SourceRequest) -> Result<SourceFetch, SourceError> {
        let group_id = req.terminal.pos_group_id.as_deref().ok_or_else(|| {
            SourceError::Config(format!("pos: terminal '{}' has no POS group", req.terminal.id))
        })?;

        let (token, fresh) = self.token(None).await?;
        let body = match self.list_shifts(&token, group_id, req).await {
            Err(SourceError::Auth(_)) if !fresh => {
                // Cached token expired: log in once more.
                tracing::debug!(terminal_id = %req.terminal.id, "pos token rejected, logging in again");
                let (token, _) = self.token(Some(&token)).await?;
                self.list_shifts(&token, group_id, req).await?
            }
            other => other?,
        };

        Ok(SourceFetch {
            items: Vec::new(),
            pos: Some(summarize_shifts(&body)?),
        })
    }
}

/// Accepts either a bare array of shifts or `{ "shifts": [...] }`.
fn summarize_shifts(body: &Value) -> Result<PosSummary, SourceError> {
    let shifts = body
        .as_array()
        .or_else(|| body.get("shifts").and_then(Value::as_array))
        .ok_or_else(|| SourceError::Decode("pos cash-shifts: expected a list of shifts".into()))?;

    let mut summary = PosSummary::default();
    for shift in shifts {
        let id = match shift.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(SourceError::Decode("pos cash-shifts: shift without id".into())),
        };
        summary.total += amount_field(shift, "total", "pos cash-shifts")?;
        summary.cash_ids.push(id);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_accepts_both_shapes() {
        let bare = json!([{"id": "s1", "total": 100}, {"id": 7, "total": "250"}]);
        let s = summarize_shifts(&bare).unwrap();
        assert_eq!(s.total, 350);
        assert_eq!(s.cash_ids, vec!["s1".to_string(), "7".to_string()]);

        let wrapped = json!({"shifts": []});
        assert_eq!(summarize_shifts(&wrapped).unwrap(), PosSummary::default());

        assert!(summarize_shifts(&json!({"data": 1})).is_err());
    }
}
