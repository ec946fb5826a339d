//! The terminal-day ledger and its line-item operations.
//!
//! Every operation here is pure: it mutates an in-memory [`ReportDay`] and
//! returns the unsealed audit entries describing the change. Sealing and
//! persistence happen in [`crate::service`].

use chrono::{DateTime, SubsecRound, Utc};
use kassa_audit::{AuditAction, AuditEntry};
use kassa_schemas::{ItemKind, LineItem, PosSummary, ReportKey, ReportStatus, SourceKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::LedgerError;

/// Actor recorded for changes made by aggregation.
pub const SYSTEM_ACTOR: &str = "system:aggregator";

// ---------------------------------------------------------------------------
// ReportDay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDay {
    pub id: Uuid,
    #[serde(flatten)]
    pub key: ReportKey,
    pub status: ReportStatus,
    /// Authoritative cashier total (integer currency units).
    pub pos_total: i64,
    /// POS cash-shift records reconciled into `pos_total`.
    pub cash_ids: Vec<String>,
    pub items: Vec<LineItem>,
    /// Denormalized at submit: sum of all incomes.
    pub total_amount: i64,
    /// Denormalized at submit: sum of manually declared incomes.
    pub total_manager_price: i64,
    /// Denormalized at submit: the balance.
    pub difference: i64,
    /// Denormalized at submit: courier-service income.
    pub arryt_income: i64,
    /// `hash_self` of the latest audit entry of this ledger.
    pub audit_head: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportDay {
    /// Empty draft for a terminal-day.
    pub fn new(key: ReportKey) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        Self {
            id: Uuid::new_v4(),
            key,
            status: ReportStatus::Draft,
            pos_total: 0,
            cash_ids: Vec::new(),
            items: Vec::new(),
            total_amount: 0,
            total_manager_price: 0,
            difference: 0,
            arryt_income: 0,
            audit_head: None,
            created_at: now,
            updated_at: now,
        }
    }

    // -- derived reads -------------------------------------------------------

    pub fn total_income(&self) -> i64 {
        self.sum_where(|i| i.kind == ItemKind::Income)
    }

    pub fn withdraws(&self) -> i64 {
        self.sum_where(|i| i.kind == ItemKind::Withdraw)
    }

    /// Expenses including withdraws.
    pub fn total_expenses(&self) -> i64 {
        self.sum_where(|i| i.kind == ItemKind::Expense) + self.withdraws()
    }

    /// Positive means cash is missing relative to the POS total.
    pub fn balance(&self) -> i64 {
        self.pos_total - (self.total_income() + self.total_expenses())
    }

    pub fn manager_income(&self) -> i64 {
        self.sum_where(|i| i.kind == ItemKind::Income && !i.readonly)
    }

    pub fn courier_income(&self) -> i64 {
        self.sum_where(|i| {
            i.kind == ItemKind::Income && i.readonly && i.source == SourceKind::Courier.as_str()
        })
    }

    fn sum_where(&self, pred: impl Fn(&LineItem) -> bool) -> i64 {
        self.items.iter().filter(|i| pred(i)).map(|i| i.amount).sum()
    }

    pub fn readonly_items(&self) -> impl Iterator<Item = &LineItem> {
        self.items.iter().filter(|i| i.readonly)
    }

    pub fn editable_items(&self) -> impl Iterator<Item = &LineItem> {
        self.items.iter().filter(|i| !i.readonly)
    }

    pub fn item(&self, id: Uuid) -> Option<&LineItem> {
        self.items.iter().find(|i| i.id == id)
    }

    fn ensure_mutable(&self) -> Result<(), LedgerError> {
        if self.status.is_mutable() {
            Ok(())
        } else {
            Err(LedgerError::NotEditable {
                status: self.status,
            })
        }
    }

    fn audit(
        &self,
        item_id: Option<Uuid>,
        action: AuditAction,
        before: Option<Value>,
        after: Option<Value>,
        actor: &str,
    ) -> AuditEntry {
        AuditEntry::record(&self.key, self.id, item_id, action, before, after, actor)
    }

    // -- readonly merge ------------------------------------------------------

    /// Overwrite readonly items in place by merge key, appending unknown ones.
    ///
    /// Editable items are never touched. Incoming items that are not readonly
    /// are ignored. Items whose amount, label and error marker are unchanged
    /// produce no audit entry, so merging the same batch twice is a no-op.
    pub fn merge_readonly(
        &mut self,
        incoming: &[LineItem],
        actor: &str,
    ) -> Result<Vec<AuditEntry>, LedgerError> {
        self.ensure_mutable()?;

        let mut entries = Vec::new();
        for new_item in incoming.iter().filter(|i| i.readonly) {
            let key = new_item.merge_key();
            let existing = self
                .items
                .iter()
                .position(|i| i.readonly && i.merge_key() == key);

            match existing {
                Some(idx) => {
                    let current = &self.items[idx];
                    if current.amount == new_item.amount
                        && current.label == new_item.label
                        && current.fetch_error == new_item.fetch_error
                    {
                        continue;
                    }
                    let before = item_snapshot(current);
                    let item = &mut self.items[idx];
                    item.amount = new_item.amount;
                    item.label = new_item.label.clone();
                    item.fetch_error = new_item.fetch_error.clone();
                    let (id, after) = (item.id, item_snapshot(item));
                    entries.push(self.audit(
                        Some(id),
                        AuditAction::ItemMerged,
                        Some(before),
                        Some(after),
                        actor,
                    ));
                }
                None => {
                    let mut item = new_item.clone();
                    if self.items.iter().any(|i| i.id == item.id) {
                        item.id = Uuid::new_v4();
                    }
                    let after = item_snapshot(&item);
                    let id = item.id;
                    self.items.push(item);
                    entries.push(self.audit(
                        Some(id),
                        AuditAction::ItemMerged,
                        None,
                        Some(after),
                        actor,
                    ));
                }
            }
        }
        Ok(entries)
    }

    /// Refresh the POS total and shift references.
    pub fn sync_pos(
        &mut self,
        pos: &PosSummary,
        actor: &str,
    ) -> Result<Option<AuditEntry>, LedgerError> {
        self.ensure_mutable()?;
        if self.pos_total == pos.total && self.cash_ids == pos.cash_ids {
            return Ok(None);
        }
        let before = json!({"pos_total": self.pos_total, "cash_ids": self.cash_ids});
        self.pos_total = pos.total;
        self.cash_ids = pos.cash_ids.clone();
        let after = json!({"pos_total": self.pos_total, "cash_ids": self.cash_ids});
        Ok(Some(self.audit(
            None,
            AuditAction::PosSynced,
            Some(before),
            Some(after),
            actor,
        )))
    }

    // -- editable items ------------------------------------------------------

    pub fn add_editable(
        &mut self,
        draft: &EditableDraft,
        actor: &str,
    ) -> Result<(Uuid, AuditEntry), LedgerError> {
        self.ensure_mutable()?;
        draft.check_kind()?;

        let mut item = LineItem::editable(draft.kind, draft.label.clone(), draft.amount)
            .with_group(draft.group_id.clone());
        if let Some(id) = draft.id {
            if self.items.iter().any(|i| i.id == id) {
                return Err(LedgerError::Forbidden(format!("line item {id} already exists")));
            }
            item.id = id;
        }

        let id = item.id;
        let after = item_snapshot(&item);
        self.items.push(item);
        let entry = self.audit(Some(id), AuditAction::ItemAdded, None, Some(after), actor);
        Ok((id, entry))
    }

    pub fn update_editable(
        &mut self,
        item_id: Uuid,
        patch: &ItemPatch,
        actor: &str,
    ) -> Result<AuditEntry, LedgerError> {
        self.ensure_mutable()?;
        let idx = self.editable_index(item_id)?;

        let before = item_snapshot(&self.items[idx]);
        let item = &mut self.items[idx];
        if let Some(label) = &patch.label {
            item.label = label.clone();
        }
        if let Some(amount) = patch.amount {
            item.amount = amount;
        }
        if let Some(group_id) = &patch.group_id {
            item.group_id = group_id.clone();
        }
        let after = item_snapshot(item);
        Ok(self.audit(
            Some(item_id),
            AuditAction::ItemUpdated,
            Some(before),
            Some(after),
            actor,
        ))
    }

    pub fn remove_editable(&mut self, item_id: Uuid, actor: &str) -> Result<AuditEntry, LedgerError> {
        self.ensure_mutable()?;
        let idx = self.editable_index(item_id)?;

        let removed = self.items.remove(idx);
        Ok(self.audit(
            Some(item_id),
            AuditAction::ItemRemoved,
            Some(item_snapshot(&removed)),
            None,
            actor,
        ))
    }

    fn editable_index(&self, item_id: Uuid) -> Result<usize, LedgerError> {
        let idx = self
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or(LedgerError::ItemNotFound(item_id))?;
        if self.items[idx].readonly {
            return Err(LedgerError::Forbidden(format!(
                "line item {item_id} is supplied by {} and is readonly",
                self.items[idx].source
            )));
        }
        Ok(idx)
    }

    /// Full snapshot used for status-transition audit entries.
    pub fn snapshot(&self) -> Value {
        json!({
            "id": self.id,
            "terminal_id": self.key.terminal_id,
            "date": self.key.date,
            "status": self.status,
            "pos_total": self.pos_total,
            "cash_ids": self.cash_ids,
            "items": self.items.iter().map(item_snapshot).collect::<Vec<_>>(),
            "total_amount": self.total_amount,
            "total_manager_price": self.total_manager_price,
            "difference": self.difference,
            "arryt_income": self.arryt_income,
        })
    }
}

pub fn item_snapshot(item: &LineItem) -> Value {
    json!({
        "id": item.id,
        "kind": item.kind,
        "label": item.label,
        "amount": item.amount,
        "source": item.source,
        "readonly": item.readonly,
        "group_id": item.group_id,
        "fetch_error": item.fetch_error,
    })
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A user-entered item as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditableDraft {
    /// Reuse an existing item's identity (submit snapshots); new id when absent.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub kind: ItemKind,
    pub label: String,
    pub amount: i64,
    #[serde(default)]
    pub group_id: Option<String>,
}

impl EditableDraft {
    pub fn new(kind: ItemKind, label: impl Into<String>, amount: i64) -> Self {
        Self {
            id: None,
            kind,
            label: label.into(),
            amount,
            group_id: None,
        }
    }

    pub(crate) fn check_kind(&self) -> Result<(), LedgerError> {
        if self.kind == ItemKind::Withdraw {
            return Err(LedgerError::Forbidden(
                "withdraw items are supplied by the courier service".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update of an editable item. `group_id: Some(None)` clears the group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub group_id: Option<Option<String>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day() -> ReportDay {
        ReportDay::new(ReportKey::new("T1", NaiveDate::from_ymd_opt(2026, 4, 2).unwrap()))
    }

    fn card(amount: i64) -> LineItem {
        LineItem::readonly(ItemKind::Income, SourceKind::CardGateway, "Payme", amount)
    }

    #[test]
    fn merge_overwrites_in_place_and_keeps_identity() {
        let mut d = day();
        d.merge_readonly(&[card(100)], SYSTEM_ACTOR).unwrap();
        let id = d.items[0].id;

        let entries = d.merge_readonly(&[card(250)], SYSTEM_ACTOR).unwrap();
        assert_eq!(d.items.len(), 1);
        assert_eq!(d.items[0].id, id);
        assert_eq!(d.items[0].amount, 250);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].before.as_ref().unwrap()["amount"], 100);
        assert_eq!(entries[0].after.as_ref().unwrap()["amount"], 250);
    }

    #[test]
    fn merge_same_batch_twice_is_a_no_op() {
        let mut d = day();
        let batch = vec![
            card(100),
            LineItem::readonly(ItemKind::Withdraw, SourceKind::Courier, "Courier A", 40),
        ];
        assert_eq!(d.merge_readonly(&batch, SYSTEM_ACTOR).unwrap().len(), 2);
        let before = d.items.clone();
        assert!(d.merge_readonly(&batch, SYSTEM_ACTOR).unwrap().is_empty());
        assert_eq!(d.items, before);
    }

    #[test]
    fn merge_ignores_editable_incoming_and_preserves_editable_items() {
        let mut d = day();
        d.add_editable(&EditableDraft::new(ItemKind::Income, "cash", 500), "alice")
            .unwrap();
        let stray = LineItem::editable(ItemKind::Income, "cash", 1);
        d.merge_readonly(&[stray, card(10)], SYSTEM_ACTOR).unwrap();

        assert_eq!(d.editable_items().count(), 1);
        assert_eq!(d.editable_items().next().unwrap().amount, 500);
        assert_eq!(d.readonly_items().count(), 1);
    }

    #[test]
    fn balance_formula_counts_withdraws_as_expenses() {
        let mut d = day();
        d.pos_total = 1_000;
        d.merge_readonly(
            &[
                card(300),
                LineItem::readonly(ItemKind::Withdraw, SourceKind::Courier, "Courier A", 100),
            ],
            SYSTEM_ACTOR,
        )
        .unwrap();
        d.add_editable(&EditableDraft::new(ItemKind::Expense, "taxi", 50), "alice")
            .unwrap();

        assert_eq!(d.total_income(), 300);
        assert_eq!(d.withdraws(), 100);
        assert_eq!(d.total_expenses(), 150);
        assert_eq!(d.balance(), 1_000 - 450);
    }

    #[test]
    fn negative_amounts_are_tolerated() {
        let mut d = day();
        d.pos_total = 100;
        d.add_editable(&EditableDraft::new(ItemKind::Income, "correction", -20), "alice")
            .unwrap();
        assert_eq!(d.balance(), 120);
    }

    #[test]
    fn readonly_items_cannot_be_edited_or_removed() {
        let mut d = day();
        d.merge_readonly(&[card(10)], SYSTEM_ACTOR).unwrap();
        let id = d.items[0].id;

        let patch = ItemPatch {
            amount: Some(99),
            ..Default::default()
        };
        assert!(matches!(
            d.update_editable(id, &patch, "alice"),
            Err(LedgerError::Forbidden(_))
        ));
        assert!(matches!(
            d.remove_editable(id, "alice"),
            Err(LedgerError::Forbidden(_))
        ));
        assert_eq!(d.items[0].amount, 10);
    }

    #[test]
    fn update_and_remove_produce_before_after() {
        let mut d = day();
        let (id, added) = d
            .add_editable(&EditableDraft::new(ItemKind::Income, "cash", 5), "alice")
            .unwrap();
        assert!(added.before.is_none());

        let patch = ItemPatch {
            amount: Some(7),
            group_id: Some(Some("g1".to_string())),
            ..Default::default()
        };
        let updated = d.update_editable(id, &patch, "alice").unwrap();
        assert_eq!(updated.before.as_ref().unwrap()["amount"], 5);
        assert_eq!(updated.after.as_ref().unwrap()["amount"], 7);
        assert_eq!(d.item(id).unwrap().group_id.as_deref(), Some("g1"));

        let removed = d.remove_editable(id, "alice").unwrap();
        assert!(removed.after.is_none());
        assert!(d.item(id).is_none());
    }

    #[test]
    fn editable_withdraw_is_forbidden() {
        let mut d = day();
        let err = d
            .add_editable(&EditableDraft::new(ItemKind::Withdraw, "x", 1), "alice")
            .unwrap_err();
        assert!(matches!(err, LedgerError::Forbidden(_)));
        assert!(d.items.is_empty());
    }

    #[test]
    fn unknown_item_is_reported() {
        let mut d = day();
        let id = Uuid::new_v4();
        assert_eq!(
            d.remove_editable(id, "alice").unwrap_err(),
            LedgerError::ItemNotFound(id)
        );
    }

    #[test]
    fn sync_pos_is_idempotent() {
        let mut d = day();
        let pos = PosSummary {
            total: 10,
            cash_ids: vec!["shift-1".into()],
        };
        assert!(d.sync_pos(&pos, SYSTEM_ACTOR).unwrap().is_some());
        assert!(d.sync_pos(&pos, SYSTEM_ACTOR).unwrap().is_none());
        assert_eq!(d.pos_total, 10);
    }
}
