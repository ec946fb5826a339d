use std::fmt;

use serde::Serialize;

/// Failure of one source fetch. Never aborts an aggregation: the aggregator
/// turns it into a zero placeholder carrying [`SourceError::marker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SourceError {
    /// Upstream rejected our credentials.
    Auth(String),
    /// Network, HTTP or protocol failure.
    Unavailable(String),
    /// The per-source deadline elapsed.
    Timeout { after_ms: u64 },
    /// Upstream answered with a payload we could not interpret.
    Decode(String),
    /// Missing credential or unusable local configuration.
    Config(String),
    /// Unknown terminal or organization.
    NotFound(String),
}

impl SourceError {
    /// Short marker stored on the placeholder line item.
    pub fn marker(&self) -> String {
        match self {
            SourceError::Auth(_) => "auth_failed".to_string(),
            SourceError::Unavailable(_) => "unavailable".to_string(),
            SourceError::Timeout { after_ms } => format!("timeout after {after_ms}ms"),
            SourceError::Decode(_) => "bad_response".to_string(),
            SourceError::Config(_) => "not_configured".to_string(),
            SourceError::NotFound(_) => "not_found".to_string(),
        }
    }

    /// Map a transport error, keeping the message free of request bodies.
    pub fn from_reqwest(what: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return SourceError::Unavailable(format!("{what}: request timed out"));
        }
        if err.is_connect() {
            return SourceError::Unavailable(format!("{what}: cannot connect"));
        }
        if err.is_decode() {
            return SourceError::Decode(format!("{what}: {err}"));
        }
        SourceError::Unavailable(format!("{what}: {err}"))
    }

    /// Map a non-success HTTP status.
    pub fn from_status(what: &str, status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => SourceError::Auth(format!("{what}: credentials rejected (HTTP {status})")),
            404 => SourceError::NotFound(format!("{what}: endpoint or object not found (HTTP 404)")),
            s => SourceError::Unavailable(format!("{what}: unexpected response (HTTP {s})")),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Auth(msg) => write!(f, "upstream auth error: {msg}"),
            SourceError::Unavailable(msg) => write!(f, "upstream unavailable: {msg}"),
            SourceError::Timeout { after_ms } => write!(f, "timed out after {after_ms}ms"),
            SourceError::Decode(msg) => write!(f, "decode error: {msg}"),
            SourceError::Config(msg) => write!(f, "config error: {msg}"),
            SourceError::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}
