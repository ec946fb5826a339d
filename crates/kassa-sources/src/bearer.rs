//! Bearer-token REST report adapters: card gateway and courier/withdraw.
//!
//! Both upstreams answer `GET {base}/api/v1/reports/{external_id}?from=&to=`
//! with a customer-facing `total` and an optional `withdraws` breakdown.
//! The external id is a terminal credential, the bearer token an
//! organization credential.

use std::time::Duration;

use async_trait::async_trait;
use kassa_config::GatewaySettings;
use kassa_schemas::{ItemKind, LineItem, SourceKind};
use serde_json::Value;

use crate::adapter::{amount_field, SourceAdapter, SourceFetch, SourceRequest};
use crate::error::SourceError;

/// Which upstream a [`BearerReportAdapter`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BearerProfile {
    pub kind: SourceKind,
    /// Terminal credential type holding the upstream's terminal id.
    pub terminal_key: &'static str,
    /// Organization credential type holding the bearer token.
    pub token_key: &'static str,
    /// Turn `withdraws[]` into readonly withdraw items.
    pub itemize_withdraws: bool,
}

impl BearerProfile {
    pub const CARD_GATEWAY: BearerProfile = BearerProfile {
        kind: SourceKind::CardGateway,
        terminal_key: "payme_terminal_id",
        token_key: "payme_token",
        itemize_withdraws: false,
    };

    pub const COURIER: BearerProfile = BearerProfile {
        kind: SourceKind::Courier,
        terminal_key: "arryt_terminal_id",
        token_key: "arryt_token",
        itemize_withdraws: true,
    };
}

pub struct BearerReportAdapter {
    profile: BearerProfile,
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl BearerReportAdapter {
    pub fn new(profile: BearerProfile, settings: &GatewaySettings) -> Result<Self, SourceError> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Config(format!("{}: http client: {e}", profile.kind)))?;
        Ok(Self {
            profile,
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn card_gateway(settings: &GatewaySettings) -> Result<Self, SourceError> {
        Self::new(BearerProfile::CARD_GATEWAY, settings)
    }

    pub fn courier(settings: &GatewaySettings) -> Result<Self, SourceError> {
        Self::new(BearerProfile::COURIER, settings)
    }
}

#[async_trait]
impl SourceAdapter for BearerReportAdapter {
    fn kind(&self) -> SourceKind {
        self.profile.kind
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, req: &SourceRequest) -> Result<SourceFetch, SourceError> {
        let kind = self.profile.kind;
        let external_id = req.terminal_key(kind, self.profile.terminal_key)?;
        let token = req.organization_key(kind, self.profile.token_key)?;
        let what = kind.as_str();

        let (from, to) = req.window.local_bounds();
        let resp = self
            .http
            .get(format!("{}/api/v1/reports/{external_id}", self.base_url))
            .bearer_auth(token)
            .query(&[("from", from.as_str()), ("to", to.as_str())])
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(what, &e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::from_status(what, status));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(format!("{what}: {e}")))?;

        normalize_report(self.profile, &body)
    }
}

fn normalize_report(profile: BearerProfile, body: &Value) -> Result<SourceFetch, SourceError> {
    let kind = profile.kind;
    let what = kind.as_str();
    let mut out = SourceFetch::income(kind, amount_field(body, "total", what)?);

    if profile.itemize_withdraws {
        let withdraws = match body.get("withdraws") {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(list)) => list.as_slice(),
            Some(_) => return Err(SourceError::Decode(format!("{what}: 'withdraws' is not a list"))),
        };
        for w in withdraws {
            let party = w
                .get("name")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| SourceError::Decode(format!("{what}: withdraw without name")))?;
            let amount = amount_field(w, "amount", what)?;
            // One item per party; repeated parties are summed.
            match out
                .items
                .iter_mut()
                .find(|i| i.kind == ItemKind::Withdraw && i.label == party)
            {
                Some(existing) => existing.amount += amount,
                None => out
                    .items
                    .push(LineItem::readonly(ItemKind::Withdraw, kind, party, amount)),
            }
        }
    }
    Ok(out)
}
