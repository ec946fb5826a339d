//! Request and response types for all kassa-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use chrono::NaiveDate;
use kassa_ledger::{EditableDraft, ItemPatch, ReviewDecision, SubmitInput};
use kassa_schemas::{ItemKind, LineItem, ReportKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// "postgres" | "memory"
    pub store: String,
    pub sources: Vec<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// Present on `REQUIRES_CONFIRMATION`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
}

// ---------------------------------------------------------------------------
// Report addressing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportQuery {
    /// `HH:MM` local time; narrows the window to `[day start, cutoff)`.
    #[serde(default)]
    pub cutoff: Option<String>,
}

/// `{terminal_id, date}`, as body or query string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRef {
    pub terminal_id: String,
    pub date: NaiveDate,
}

impl ReportRef {
    pub fn key(&self) -> ReportKey {
        ReportKey::new(self.terminal_id.clone(), self.date)
    }
}

// ---------------------------------------------------------------------------
// editable-incomes / editable-expenses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSplitResponse {
    pub readonly: Vec<LineItem>,
    pub editable: Vec<LineItem>,
}

// ---------------------------------------------------------------------------
// items/add  items/update  items/remove
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddItemRequest {
    pub terminal_id: String,
    pub date: NaiveDate,
    #[serde(rename = "type", alias = "kind")]
    pub kind: ItemKind,
    pub label: String,
    pub amount: i64,
    #[serde(default)]
    pub group_id: Option<String>,
}

impl AddItemRequest {
    pub fn draft(&self) -> EditableDraft {
        EditableDraft {
            id: None,
            kind: self.kind,
            label: self.label.clone(),
            amount: self.amount,
            group_id: self.group_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddItemResponse {
    pub item_id: Uuid,
    pub report: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateItemRequest {
    pub terminal_id: String,
    pub date: NaiveDate,
    pub item_id: Uuid,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub group_id: Option<String>,
    /// Drop the item's group.
    #[serde(default)]
    pub clear_group: bool,
}

impl UpdateItemRequest {
    pub fn patch(&self) -> ItemPatch {
        let group_id = if self.clear_group {
            Some(None)
        } else {
            self.group_id.clone().map(Some)
        };
        ItemPatch {
            label: self.label.clone(),
            amount: self.amount,
            group_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveItemRequest {
    pub terminal_id: String,
    pub date: NaiveDate,
    pub item_id: Uuid,
}

// ---------------------------------------------------------------------------
// submit
// ---------------------------------------------------------------------------

/// One row of the client's income/expense tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitItem {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub readonly: bool,
    pub label: String,
    pub amount: i64,
    #[serde(default)]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub terminal_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub incomes: Option<Vec<SubmitItem>>,
    #[serde(default)]
    pub expenses: Option<Vec<SubmitItem>>,
    #[serde(default, alias = "forceConfirm")]
    pub force_confirm: bool,
}

impl SubmitRequest {
    /// Readonly rows are server-owned and ignored. A table left out of the
    /// body keeps the stored editable items of its kind.
    pub fn input(&self) -> SubmitInput {
        SubmitInput {
            incomes: self.incomes.as_deref().map(|rows| drafts(rows, ItemKind::Income)),
            expenses: self.expenses.as_deref().map(|rows| drafts(rows, ItemKind::Expense)),
            force_confirm: self.force_confirm,
        }
    }
}

fn drafts(rows: &[SubmitItem], kind: ItemKind) -> Vec<EditableDraft> {
    rows.iter()
        .filter(|r| !r.readonly)
        .map(|r| EditableDraft {
            id: r.id,
            kind,
            label: r.label.clone(),
            amount: r.amount,
            group_id: r.group_id.clone(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// review / reopen / is_editable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub terminal_id: String,
    pub date: NaiveDate,
    pub decision: ReviewDecision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsEditableResponse {
    pub is_editable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submit_body_keeps_only_editable_rows() {
        let req: SubmitRequest = serde_json::from_value(json!({
            "terminal_id": "T1",
            "date": "2026-04-02",
            "incomes": [
                {"type": "income", "readonly": true, "label": "Payme", "amount": 2000000},
                {"type": "income", "label": "Cash", "amount": 3500000}
            ],
            "expenses": [{"type": "expense", "label": "Bread", "amount": 12000}],
            "forceConfirm": true
        }))
        .unwrap();

        let input = req.input();
        assert!(input.force_confirm);
        let incomes = input.incomes.unwrap();
        assert_eq!(incomes.len(), 1);
        assert_eq!(incomes[0].kind, ItemKind::Income);
        assert_eq!(incomes[0].label, "Cash");
        assert_eq!(input.expenses.unwrap()[0].kind, ItemKind::Expense);
    }

    #[test]
    fn absent_table_stays_absent() {
        let req: SubmitRequest = serde_json::from_value(json!({
            "terminal_id": "T1",
            "date": "2026-04-02",
            "incomes": [{"label": "Cash", "amount": 40}]
        }))
        .unwrap();
        let input = req.input();
        assert_eq!(input.incomes.map(|d| d.len()), Some(1));
        assert_eq!(input.expenses, None);
    }

    #[test]
    fn submit_without_tables_submits_stored_items() {
        let req: SubmitRequest =
            serde_json::from_value(json!({"terminal_id": "T1", "date": "2026-04-02"})).unwrap();
        let input = req.input();
        assert_eq!(input.incomes, None);
        assert_eq!(input.expenses, None);
    }

    #[test]
    fn clear_group_wins_over_group_id() {
        let req: UpdateItemRequest = serde_json::from_value(json!({
            "terminal_id": "T1",
            "date": "2026-04-02",
            "item_id": Uuid::nil(),
            "group_id": "g",
            "clear_group": true
        }))
        .unwrap();
        assert_eq!(req.patch().group_id, Some(None));
    }
}
