//! Uniform source-adapter contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use kassa_schemas::{ItemKind, LineItem, PosSummary, SourceKind, Terminal};
use serde_json::Value;

use crate::error::SourceError;
use crate::resolver::Credentials;
use crate::window::BusinessWindow;

/// Everything an adapter needs for one fetch.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub terminal: Terminal,
    pub credentials: Credentials,
    pub date: NaiveDate,
    pub window: BusinessWindow,
}

impl SourceRequest {
    pub fn terminal_key(&self, source: SourceKind, cred_type: &str) -> Result<&str, SourceError> {
        self.credentials.terminal_key(cred_type).ok_or_else(|| {
            SourceError::Config(format!(
                "{source}: credential '{cred_type}' not configured for terminal '{}'",
                self.terminal.id
            ))
        })
    }

    pub fn organization_key(&self, source: SourceKind, cred_type: &str) -> Result<&str, SourceError> {
        self.credentials.organization_key(cred_type).ok_or_else(|| {
            SourceError::Config(format!(
                "{source}: credential '{cred_type}' not configured for organization '{}'",
                self.terminal.organization_id
            ))
        })
    }
}

/// Normalized result of one adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFetch {
    /// Readonly line items tagged with the adapter's source id.
    pub items: Vec<LineItem>,
    /// Set only by the POS adapter.
    pub pos: Option<PosSummary>,
}

impl SourceFetch {
    /// A single readonly income item labelled after the source.
    pub fn income(source: SourceKind, total: i64) -> Self {
        Self {
            items: vec![LineItem::readonly(ItemKind::Income, source, source.label(), total)],
            pos: None,
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Deadline the aggregator enforces around [`SourceAdapter::fetch`].
    fn timeout(&self) -> Duration;

    async fn fetch(&self, req: &SourceRequest) -> Result<SourceFetch, SourceError>;
}

/// Integer currency amount from a provider value: integers, floats (rounded)
/// and numeric strings are accepted.
pub fn amount_from_value(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    }
}

/// Read a required amount field from an object.
pub fn amount_field(obj: &Value, field: &str, what: &str) -> Result<i64, SourceError> {
    obj.get(field)
        .and_then(amount_from_value)
        .ok_or_else(|| SourceError::Decode(format!("{what}: missing or non-numeric '{field}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amounts_accept_provider_shapes() {
        assert_eq!(amount_from_value(&json!(150)), Some(150));
        assert_eq!(amount_from_value(&json!(99.6)), Some(100));
        assert_eq!(amount_from_value(&json!(" 2000000 ")), Some(2_000_000));
        assert_eq!(amount_from_value(&json!("12.4")), Some(12));
        assert_eq!(amount_from_value(&json!(null)), None);
        assert_eq!(amount_from_value(&json!("abc")), None);
    }

    #[test]
    fn missing_amount_is_decode_error() {
        let err = amount_field(&json!({"sum": 1}), "total", "payme").unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }
}
