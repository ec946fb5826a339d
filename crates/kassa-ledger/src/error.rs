use std::fmt;

use kassa_schemas::{ReportKey, ReportStatus};
use uuid::Uuid;

/// Errors returned by ledger mutations and workflow transitions.
///
/// Every variant except `Store` is raised before anything is written: the
/// ledger stays in its prior consistent state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger's status does not permit mutation.
    NotEditable { status: ReportStatus },
    /// Cash shortfall at submit time without an explicit override.
    RequiresConfirmation { balance: i64 },
    /// The operation is not allowed on this item (e.g. editing a readonly item).
    Forbidden(String),
    /// Unknown terminal or ledger.
    NotFound(String),
    ItemNotFound(Uuid),
    /// Review/reopen requested from a status that does not allow it.
    InvalidTransition { from: ReportStatus, to: ReportStatus },
    /// Persistence failure.
    Store(String),
}

impl LedgerError {
    pub fn not_found(key: &ReportKey) -> Self {
        LedgerError::NotFound(format!("no report for {key}"))
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotEditable { .. } => "NOT_EDITABLE",
            LedgerError::RequiresConfirmation { .. } => "REQUIRES_CONFIRMATION",
            LedgerError::Forbidden(_) => "FORBIDDEN",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::ItemNotFound(_) => "ITEM_NOT_FOUND",
            LedgerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LedgerError::Store(_) => "STORE_ERROR",
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::NotEditable { status } => {
                write!(f, "report is {status} and can no longer be edited")
            }
            LedgerError::RequiresConfirmation { balance } => write!(
                f,
                "shortfall of {balance} detected, confirm to proceed"
            ),
            LedgerError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            LedgerError::NotFound(msg) => write!(f, "not found: {msg}"),
            LedgerError::ItemNotFound(id) => write!(f, "line item {id} not found"),
            LedgerError::InvalidTransition { from, to } => {
                write!(f, "illegal status transition: {from} -> {to}")
            }
            LedgerError::Store(msg) => write!(f, "store error: {msg}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<anyhow::Error> for LedgerError {
    fn from(e: anyhow::Error) -> Self {
        LedgerError::Store(format!("{e:#}"))
    }
}
