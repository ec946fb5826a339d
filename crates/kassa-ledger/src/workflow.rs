//! Reconciliation workflow: the status state machine of a [`ReportDay`].
//!
//! # State diagram
//!
//! ```text
//!              submit (balance <= 0, or force_confirm)
//!    Draft ─────────────────────────────────────────► Checking ◄─┐
//!      ▲                                                │ │ │     │ submit
//!      │                 reopen                         │ │ └─────┘ (resubmit)
//!      └────────────────────────────────────────────────┘ │
//!                                                          │ review
//!                                   ┌──────────────────────┴───────┐
//!                                   ▼                              ▼
//!                           Confirmed (term.)              Cancelled (term.)
//! ```
//!
//! `Sent` is accepted wherever `Checking` is: both are the pending-review
//! phase. Every transition returns the single audit entry that records it;
//! an error leaves the ledger exactly as it was.

use kassa_audit::{AuditAction, AuditEntry};
use kassa_schemas::{ItemKind, LineItem, ReportStatus};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::model::{EditableDraft, ReportDay};

/// Submission request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitInput {
    /// Client snapshot of the editable incomes. `None` keeps the stored ones.
    #[serde(default)]
    pub incomes: Option<Vec<EditableDraft>>,
    /// Client snapshot of the editable expenses. `None` keeps the stored ones.
    #[serde(default)]
    pub expenses: Option<Vec<EditableDraft>>,
    /// Operator acknowledged a cash shortfall.
    #[serde(default)]
    pub force_confirm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Confirm,
    Cancel,
}

impl ReviewDecision {
    fn target(self) -> ReportStatus {
        match self {
            ReviewDecision::Confirm => ReportStatus::Confirmed,
            ReviewDecision::Cancel => ReportStatus::Cancelled,
        }
    }
}

impl ReportDay {
    /// Submit the ledger for review.
    ///
    /// Rejects with `NotEditable` outside draft/pending review and with
    /// `RequiresConfirmation` on a positive balance unless `force_confirm`.
    pub fn submit(&mut self, input: &SubmitInput, actor: &str) -> Result<AuditEntry, LedgerError> {
        if !self.status.is_mutable() {
            return Err(LedgerError::NotEditable {
                status: self.status,
            });
        }

        let before = self.snapshot();
        let mut next = self.clone();
        if let Some(drafts) = &input.incomes {
            next.replace_editable(ItemKind::Income, drafts)?;
        }
        if let Some(drafts) = &input.expenses {
            next.replace_editable(ItemKind::Expense, drafts)?;
        }

        let balance = next.balance();
        if balance > 0 && !input.force_confirm {
            return Err(LedgerError::RequiresConfirmation { balance });
        }

        next.total_amount = next.total_income();
        next.total_manager_price = next.manager_income();
        next.difference = balance;
        next.arryt_income = next.courier_income();
        next.status = ReportStatus::Checking;

        let entry = next.transition_entry(AuditAction::Submitted, before, actor);
        *self = next;
        Ok(entry)
    }

    /// Downstream review outcome; only from pending review.
    pub fn review(&mut self, decision: ReviewDecision, actor: &str) -> Result<AuditEntry, LedgerError> {
        let to = decision.target();
        if !self.status.is_pending_review() {
            return Err(LedgerError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        let before = self.snapshot();
        self.status = to;
        Ok(self.transition_entry(AuditAction::Reviewed, before, actor))
    }

    /// Authorized reversal of a submission back to draft.
    pub fn reopen(&mut self, actor: &str) -> Result<AuditEntry, LedgerError> {
        if !self.status.is_pending_review() {
            return Err(LedgerError::InvalidTransition {
                from: self.status,
                to: ReportStatus::Draft,
            });
        }
        let before = self.snapshot();
        self.status = ReportStatus::Draft;
        Ok(self.transition_entry(AuditAction::Reopened, before, actor))
    }

    pub fn is_editable(&self) -> bool {
        self.status.is_mutable()
    }

    fn transition_entry(
        &self,
        action: AuditAction,
        before: serde_json::Value,
        actor: &str,
    ) -> AuditEntry {
        AuditEntry::record(
            &self.key,
            self.id,
            None,
            action,
            Some(before),
            Some(self.snapshot()),
            actor,
        )
    }

    /// Swap the editable items of one table for the submitted snapshot.
    /// Editable items of the other table are left alone. Drafts carrying an
    /// id of an existing editable item of the same kind keep that identity.
    fn replace_editable(&mut self, kind: ItemKind, drafts: &[EditableDraft]) -> Result<(), LedgerError> {
        let mut kept: Vec<LineItem> = self
            .items
            .iter()
            .filter(|i| i.readonly || i.kind != kind)
            .cloned()
            .collect();
        for draft in drafts {
            draft.check_kind()?;
            let mut item = LineItem::editable(kind, draft.label.clone(), draft.amount).with_group(draft.group_id.clone());
            if let Some(id) = draft.id {
                let taken = kept.iter().any(|i| i.id == id);
                let known = self.items.iter().any(|i| i.id == id && !i.readonly && i.kind == kind);
                if !taken && known {
                    item.id = id;
                }
            }
            kept.push(item);
        }
        self.items = kept;
        Ok(())
    }
}
