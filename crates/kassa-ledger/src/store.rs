//! Ledger persistence seam.
//!
//! `kassa-db` provides the PostgreSQL implementation; [`InMemoryLedgerStore`]
//! backs tests and database-less runs.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kassa_audit::AuditEntry;
use kassa_schemas::ReportKey;

use crate::model::ReportDay;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, key: &ReportKey) -> Result<Option<ReportDay>>;

    /// Return the ledger for `key`, creating an empty draft if none exists.
    /// Concurrent callers for the same key must observe the same ledger.
    async fn get_or_create(&self, key: &ReportKey) -> Result<ReportDay>;

    /// Persist `day` (header and full item set) together with `entries`.
    /// Either everything is written or nothing is.
    async fn commit(&self, day: &ReportDay, entries: &[AuditEntry]) -> Result<()>;

    /// Audit entries of the ledger in commit order.
    async fn history(&self, key: &ReportKey) -> Result<Vec<AuditEntry>>;
}

#[derive(Default)]
struct Inner {
    days: HashMap<ReportKey, ReportDay>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    inner: Mutex<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledgers held.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.days.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every audit entry across ledgers, in commit order.
    pub fn all_audit(&self) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .map(|g| g.audit.clone())
            .unwrap_or_default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory ledger store lock poisoned")
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get(&self, key: &ReportKey) -> Result<Option<ReportDay>> {
        let g = self.inner.lock().map_err(|_| poisoned())?;
        Ok(g.days.get(key).cloned())
    }

    async fn get_or_create(&self, key: &ReportKey) -> Result<ReportDay> {
        let mut g = self.inner.lock().map_err(|_| poisoned())?;
        let day = g
            .days
            .entry(key.clone())
            .or_insert_with(|| ReportDay::new(key.clone()));
        Ok(day.clone())
    }

    async fn commit(&self, day: &ReportDay, entries: &[AuditEntry]) -> Result<()> {
        let mut g = self.inner.lock().map_err(|_| poisoned())?;
        if let Some(existing) = g.days.get(&day.key) {
            if existing.id != day.id {
                return Err(anyhow!(
                    "report {} already exists with id {}",
                    day.key,
                    existing.id
                ));
            }
        }
        g.days.insert(day.key.clone(), day.clone());
        g.audit.extend_from_slice(entries);
        Ok(())
    }

    async fn history(&self, key: &ReportKey) -> Result<Vec<AuditEntry>> {
        let g = self.inner.lock().map_err(|_| poisoned())?;
        Ok(g
            .audit
            .iter()
            .filter(|e| e.terminal_id == key.terminal_id && e.report_date == key.date)
            .cloned()
            .collect())
    }
}
