//! Reconciliation engine: aggregation glued to the ledger.
//!
//! `fetch_report` is the one path that talks to upstream systems. Every other
//! operation is a ledger call with the acting user attached.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use kassa_audit::AuditEntry;
use kassa_config::WorkDay;
use kassa_ledger::{
    EditableDraft, ItemPatch, LedgerError, LedgerService, ReportDay, ReviewDecision, SubmitInput, SYSTEM_ACTOR,
};
use kassa_schemas::ReportKey;
use kassa_sources::{Aggregator, SourceError, SourceFailure};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Where the business-day boundaries come from. Read per aggregation.
#[async_trait]
pub trait WorkDaySource: Send + Sync {
    async fn work_day(&self) -> anyhow::Result<WorkDay>;
}

/// Fixed boundaries from config.
pub struct StaticWorkDay(pub WorkDay);

#[async_trait]
impl WorkDaySource for StaticWorkDay {
    async fn work_day(&self) -> anyhow::Result<WorkDay> {
        Ok(self.0.clone())
    }
}

/// Boundaries from the `settings` table, config as fallback.
pub struct PgWorkDay {
    pub pool: PgPool,
    pub fallback: WorkDay,
}

#[async_trait]
impl WorkDaySource for PgWorkDay {
    async fn work_day(&self) -> anyhow::Result<WorkDay> {
        kassa_db::fetch_work_day(&self.pool, &self.fallback).await
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Ledger(LedgerError),
    /// Terminal could not be resolved or its window not built.
    Source(SourceError),
    Settings(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Ledger(e) => write!(f, "{e}"),
            EngineError::Source(e) => write!(f, "{e}"),
            EngineError::Settings(msg) => write!(f, "settings unavailable: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        EngineError::Ledger(e)
    }
}

impl From<SourceError> for EngineError {
    fn from(e: SourceError) -> Self {
        EngineError::Source(e)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Ledger plus its derived figures, as served to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ReportView {
    #[serde(flatten)]
    pub report: ReportDay,
    pub total_income: i64,
    pub total_expenses: i64,
    pub withdraws: i64,
    pub balance: i64,
    pub is_editable: bool,
    /// Sources that failed during this fetch; empty for non-fetch calls.
    pub source_errors: Vec<SourceFailure>,
}

impl ReportView {
    pub fn new(report: ReportDay, source_errors: Vec<SourceFailure>) -> Self {
        Self {
            total_income: report.total_income(),
            total_expenses: report.total_expenses(),
            withdraws: report.withdraws(),
            balance: report.balance(),
            is_editable: report.is_editable(),
            source_errors,
            report,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    aggregator: Aggregator,
    ledger: LedgerService,
    workday: Arc<dyn WorkDaySource>,
}

impl Engine {
    pub fn new(aggregator: Aggregator, ledger: LedgerService, workday: Arc<dyn WorkDaySource>) -> Self {
        Self {
            aggregator,
            ledger,
            workday,
        }
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    /// Aggregate all sources for the terminal-day and merge the result.
    /// The flag is true when the ledger was created or the merge wrote to it.
    ///
    /// A ledger that is already confirmed or cancelled is returned as stored,
    /// without calling any upstream.
    pub async fn fetch_report(
        &self,
        terminal_id: &str,
        date: NaiveDate,
        cutoff: Option<NaiveTime>,
    ) -> Result<(ReportView, bool), EngineError> {
        let key = ReportKey::new(terminal_id, date);
        let existed = match self.ledger.get(&key).await {
            Ok(existing) if existing.status.is_terminal() => {
                return Ok((ReportView::new(existing, Vec::new()), false));
            }
            Ok(_) => true,
            Err(_) => false,
        };

        let workday = self
            .workday
            .work_day()
            .await
            .map_err(|e| EngineError::Settings(format!("{e:#}")))?;
        let outcome = self.aggregator.aggregate(&workday, terminal_id, date, cutoff).await?;

        let merged = self
            .ledger
            .merge_readonly_counted(&key, &outcome.items, outcome.pos.as_ref(), SYSTEM_ACTOR)
            .await;
        let (report, changed) = match merged {
            Ok((day, written)) => (day, written > 0 || !existed),
            // Finalized between the check above and the merge.
            Err(LedgerError::NotEditable { .. }) => (self.ledger.get(&key).await?, false),
            Err(e) => return Err(e.into()),
        };
        Ok((ReportView::new(report, outcome.errors), changed))
    }

    pub async fn is_editable(&self, key: &ReportKey) -> Result<bool, EngineError> {
        Ok(self.ledger.is_editable(key).await?)
    }

    pub async fn view(&self, key: &ReportKey) -> Result<ReportView, EngineError> {
        Ok(ReportView::new(self.ledger.get(key).await?, Vec::new()))
    }

    pub async fn add_item(
        &self,
        key: &ReportKey,
        draft: &EditableDraft,
        actor: &str,
    ) -> Result<(ReportView, Uuid), EngineError> {
        let (day, id) = self.ledger.add_editable(key, draft, actor).await?;
        Ok((ReportView::new(day, Vec::new()), id))
    }

    pub async fn update_item(
        &self,
        key: &ReportKey,
        item_id: Uuid,
        patch: &ItemPatch,
        actor: &str,
    ) -> Result<ReportView, EngineError> {
        let day = self.ledger.update_editable(key, item_id, patch, actor).await?;
        Ok(ReportView::new(day, Vec::new()))
    }

    pub async fn remove_item(&self, key: &ReportKey, item_id: Uuid, actor: &str) -> Result<ReportView, EngineError> {
        let day = self.ledger.remove_editable(key, item_id, actor).await?;
        Ok(ReportView::new(day, Vec::new()))
    }

    pub async fn submit(&self, key: &ReportKey, input: &SubmitInput, actor: &str) -> Result<ReportView, EngineError> {
        let day = self.ledger.submit(key, input, actor).await?;
        Ok(ReportView::new(day, Vec::new()))
    }

    pub async fn review(
        &self,
        key: &ReportKey,
        decision: ReviewDecision,
        actor: &str,
    ) -> Result<ReportView, EngineError> {
        let day = self.ledger.review(key, decision, actor).await?;
        Ok(ReportView::new(day, Vec::new()))
    }

    pub async fn reopen(&self, key: &ReportKey, actor: &str) -> Result<ReportView, EngineError> {
        let day = self.ledger.reopen(key, actor).await?;
        Ok(ReportView::new(day, Vec::new()))
    }

    pub async fn history(&self, key: &ReportKey) -> Result<Vec<AuditEntry>, EngineError> {
        Ok(self.ledger.history(key).await?)
    }
}
