//! kassa-schemas
//!
//! Shared data model for the daily cash reconciliation engine: terminals,
//! report keys, line items and report statuses. No IO, no business logic
//! beyond the small helpers every consumer needs.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source identifier stamped on user-entered line items.
pub const MANUAL_SOURCE: &str = "manual";

// ---------------------------------------------------------------------------
// Terminal / Organization
// ---------------------------------------------------------------------------

/// A physical cash register. Owned by master data; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminal {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    /// POS cash-shift group the terminal belongs to.
    #[serde(default)]
    pub pos_group_id: Option<String>,
    /// IANA timezone override; falls back to the configured work-day timezone.
    #[serde(default)]
    pub timezone: Option<String>,
}

// ---------------------------------------------------------------------------
// ReportKey
// ---------------------------------------------------------------------------

/// Composite identity of a ledger: one terminal on one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportKey {
    pub terminal_id: String,
    pub date: NaiveDate,
}

impl ReportKey {
    pub fn new(terminal_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            date,
        }
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.terminal_id, self.date.format("%Y-%m-%d"))
    }
}

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// The five external revenue channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// POS cashier totals (feeds `pos_total`, not a line item).
    Pos,
    /// Card-processing gateway.
    CardGateway,
    /// Click-to-pay gateway (stateful socket).
    ClickGateway,
    /// Food-delivery marketplace.
    Marketplace,
    /// Courier / withdraw service.
    Courier,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Pos,
        SourceKind::CardGateway,
        SourceKind::ClickGateway,
        SourceKind::Marketplace,
        SourceKind::Courier,
    ];

    /// Stable identifier written into `LineItem::source`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pos => "pos",
            SourceKind::CardGateway => "payme",
            SourceKind::ClickGateway => "click",
            SourceKind::Marketplace => "yandex",
            SourceKind::Courier => "arryt",
        }
    }

    /// Config section name under `sources.`.
    pub fn config_key(&self) -> &'static str {
        match self {
            SourceKind::Pos => "pos",
            SourceKind::CardGateway => "card_gateway",
            SourceKind::ClickGateway => "click_gateway",
            SourceKind::Marketplace => "marketplace",
            SourceKind::Courier => "courier",
        }
    }

    /// Human label used for the source's income line item.
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Pos => "POS",
            SourceKind::CardGateway => "Payme",
            SourceKind::ClickGateway => "Click",
            SourceKind::Marketplace => "Yandex Eats",
            SourceKind::Courier => "Arryt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        SourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.config_key() == s)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LineItem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Income,
    Expense,
    /// Cash withdrawn by a courier/collector; counted on the expense side.
    Withdraw,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Income => "income",
            ItemKind::Expense => "expense",
            ItemKind::Withdraw => "withdraw",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "income" => Some(ItemKind::Income),
            "expense" => Some(ItemKind::Expense),
            "withdraw" => Some(ItemKind::Withdraw),
            _ => None,
        }
    }
}

/// Natural identity of a readonly item for merge purposes.
///
/// Withdraw items are additionally keyed by the withdrawing party, so one
/// source can contribute several of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergeKey {
    pub kind: ItemKind,
    pub source: String,
    pub party: Option<String>,
}

/// One income / expense / withdraw entry of a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    pub kind: ItemKind,
    pub label: String,
    /// Integer currency units. Negative values are tolerated (correcting entries).
    pub amount: i64,
    /// Adapter identifier (`SourceKind::as_str`) or [`MANUAL_SOURCE`].
    pub source: String,
    /// `true` for adapter-supplied items.
    pub readonly: bool,
    #[serde(default)]
    pub group_id: Option<String>,
    /// Set when the source could not be fetched; the amount is then a zero placeholder.
    #[serde(default)]
    pub fetch_error: Option<String>,
}

impl LineItem {
    /// Adapter-supplied item.
    pub fn readonly(kind: ItemKind, source: SourceKind, label: impl Into<String>, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            label: label.into(),
            amount,
            source: source.as_str().to_string(),
            readonly: true,
            group_id: None,
            fetch_error: None,
        }
    }

    /// Zero-amount stand-in for a source that failed to answer.
    pub fn placeholder(kind: ItemKind, source: SourceKind, error: impl Into<String>) -> Self {
        let mut item = Self::readonly(kind, source, source.label(), 0);
        item.fetch_error = Some(error.into());
        item
    }

    /// User-entered item.
    pub fn editable(kind: ItemKind, label: impl Into<String>, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            label: label.into(),
            amount,
            source: MANUAL_SOURCE.to_string(),
            readonly: false,
            group_id: None,
            fetch_error: None,
        }
    }

    pub fn with_group(mut self, group_id: Option<String>) -> Self {
        self.group_id = group_id;
        self
    }

    /// `None` for editable items: they have no natural key.
    pub fn merge_key(&self) -> Option<MergeKey> {
        if !self.readonly {
            return None;
        }
        let party = match self.kind {
            ItemKind::Withdraw => Some(self.label.clone()),
            _ => None,
        };
        Some(MergeKey {
            kind: self.kind,
            source: self.source.clone(),
            party,
        })
    }
}

/// Authoritative cashier total for a terminal-day plus the cash-shift
/// records it was summed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosSummary {
    pub total: i64,
    pub cash_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// ReportStatus
// ---------------------------------------------------------------------------

/// Lifecycle label of a ledger.
///
/// `Checking` and `Sent` are one "pending review" phase. `Confirmed` and
/// `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Draft,
    Checking,
    Sent,
    #[serde(alias = "comfirmed")]
    Confirmed,
    Cancelled,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Checking => "checking",
            ReportStatus::Sent => "sent",
            ReportStatus::Confirmed => "confirmed",
            ReportStatus::Cancelled => "cancelled",
        }
    }

    /// Accepts the legacy `comfirmed` spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(ReportStatus::Draft),
            "checking" => Some(ReportStatus::Checking),
            "sent" => Some(ReportStatus::Sent),
            "confirmed" | "comfirmed" => Some(ReportStatus::Confirmed),
            "cancelled" | "canceled" => Some(ReportStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_pending_review(&self) -> bool {
        matches!(self, ReportStatus::Checking | ReportStatus::Sent)
    }

    /// Line items may be added/edited/removed and the ledger re-aggregated.
    pub fn is_mutable(&self) -> bool {
        matches!(self, ReportStatus::Draft) || self.is_pending_review()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Confirmed | ReportStatus::Cancelled)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_accepts_legacy_spelling() {
        assert_eq!(ReportStatus::parse("comfirmed"), Some(ReportStatus::Confirmed));
        assert_eq!(ReportStatus::parse("Confirmed"), Some(ReportStatus::Confirmed));
        assert_eq!(ReportStatus::parse("bogus"), None);

        let s: ReportStatus = serde_json::from_str("\"comfirmed\"").unwrap();
        assert_eq!(s, ReportStatus::Confirmed);
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"confirmed\"");
    }

    #[test]
    fn pending_review_phase_is_mutable_terminal_states_are_not() {
        assert!(ReportStatus::Draft.is_mutable());
        assert!(ReportStatus::Checking.is_mutable());
        assert!(ReportStatus::Sent.is_mutable());
        assert!(!ReportStatus::Confirmed.is_mutable());
        assert!(!ReportStatus::Cancelled.is_mutable());
        assert!(ReportStatus::Sent.is_pending_review());
        assert!(ReportStatus::Cancelled.is_terminal());
    }

    #[test]
    fn editable_items_have_no_merge_key() {
        let item = LineItem::editable(ItemKind::Income, "cash", 100);
        assert!(item.merge_key().is_none());
        assert_eq!(item.source, MANUAL_SOURCE);
    }

    #[test]
    fn withdraw_merge_key_includes_party() {
        let a = LineItem::readonly(ItemKind::Withdraw, SourceKind::Courier, "Courier A", 10);
        let b = LineItem::readonly(ItemKind::Withdraw, SourceKind::Courier, "Courier B", 10);
        assert_ne!(a.merge_key(), b.merge_key());

        let c = LineItem::readonly(ItemKind::Income, SourceKind::Courier, "Arryt", 10);
        assert_eq!(c.merge_key().unwrap().party, None);
    }

    #[test]
    fn placeholder_is_zero_with_marker() {
        let p = LineItem::placeholder(ItemKind::Income, SourceKind::Marketplace, "timeout");
        assert_eq!(p.amount, 0);
        assert!(p.readonly);
        assert_eq!(p.fetch_error.as_deref(), Some("timeout"));
        assert_eq!(p.source, "yandex");
    }

    #[test]
    fn source_kind_parse_accepts_id_and_config_key() {
        assert_eq!(SourceKind::parse("payme"), Some(SourceKind::CardGateway));
        assert_eq!(SourceKind::parse("card_gateway"), Some(SourceKind::CardGateway));
        assert_eq!(SourceKind::parse("nope"), None);
    }
}
