//! Serialized, audited access to ledgers.
//!
//! All writes to one `(terminal_id, date)` go through a per-key async lock,
//! so merges, edits and transitions of the same terminal-day never
//! interleave. Different terminal-days share no lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{SubsecRound, Utc};
use kassa_audit::{seal, AuditEntry, AuditWriter};
use kassa_schemas::{LineItem, PosSummary, ReportKey};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::model::{EditableDraft, ItemPatch, ReportDay};
use crate::store::LedgerStore;
use crate::workflow::{ReviewDecision, SubmitInput};

type KeyLocks = HashMap<ReportKey, Arc<AsyncMutex<()>>>;

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    locks: Mutex<KeyLocks>,
    hash_chain: bool,
    mirror: Option<Mutex<AuditWriter>>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            hash_chain: true,
            mirror: None,
        }
    }

    pub fn with_hash_chain(mut self, enabled: bool) -> Self {
        self.hash_chain = enabled;
        self
    }

    /// Mirror every committed audit entry into a JSONL file.
    pub fn with_mirror(mut self, writer: AuditWriter) -> Self {
        self.mirror = Some(Mutex::new(writer));
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    async fn lock(&self, key: &ReportKey) -> Result<OwnedMutexGuard<()>, LedgerError> {
        let slot = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| LedgerError::Store("ledger lock table poisoned".to_string()))?;
            locks.retain(|k, m| k == key || Arc::strong_count(m) > 1);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        Ok(slot.lock_owned().await)
    }

    /// Load (or lazily create), apply `op`, then seal and commit its audit
    /// entries. Nothing is written when `op` fails or records no change.
    async fn mutate<T, F>(&self, key: &ReportKey, create: bool, op: F) -> Result<(ReportDay, T), LedgerError>
    where
        F: FnOnce(&mut ReportDay) -> Result<(T, Vec<AuditEntry>), LedgerError>,
    {
        let _guard = self.lock(key).await?;

        let mut day = if create {
            self.store.get_or_create(key).await?
        } else {
            self.store
                .get(key)
                .await?
                .ok_or_else(|| LedgerError::not_found(key))?
        };

        let (out, mut entries) = op(&mut day)?;
        if entries.is_empty() {
            return Ok((day, out));
        }

        if self.hash_chain {
            let mut head = day.audit_head.clone();
            for entry in entries.iter_mut() {
                head = Some(seal(entry, head)?);
            }
            day.audit_head = head;
        }
        day.updated_at = Utc::now().trunc_subsecs(6);

        self.store.commit(&day, &entries).await?;
        self.mirror_entries(&entries);

        tracing::debug!(
            terminal_id = %key.terminal_id,
            date = %key.date,
            entries = entries.len(),
            status = %day.status,
            "ledger committed"
        );
        Ok((day, out))
    }

    fn mirror_entries(&self, entries: &[AuditEntry]) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let Ok(mut writer) = mirror.lock() else {
            tracing::warn!("audit mirror lock poisoned; entries not mirrored");
            return;
        };
        for entry in entries {
            if let Err(e) = writer.append(entry) {
                tracing::warn!(error = %format!("{e:#}"), path = ?writer.path(), "audit mirror append failed");
                return;
            }
        }
    }

    // -- reads ---------------------------------------------------------------

    pub async fn get_or_create(&self, key: &ReportKey) -> Result<ReportDay, LedgerError> {
        let _guard = self.lock(key).await?;
        Ok(self.store.get_or_create(key).await?)
    }

    pub async fn get(&self, key: &ReportKey) -> Result<ReportDay, LedgerError> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| LedgerError::not_found(key))
    }

    /// A terminal-day with no ledger yet is editable; the ledger is not created.
    pub async fn is_editable(&self, key: &ReportKey) -> Result<bool, LedgerError> {
        Ok(self
            .store
            .get(key)
            .await?
            .map(|d| d.is_editable())
            .unwrap_or(true))
    }

    pub async fn history(&self, key: &ReportKey) -> Result<Vec<AuditEntry>, LedgerError> {
        Ok(self.store.history(key).await?)
    }

    // -- mutations -----------------------------------------------------------

    /// Merge an aggregation result. `pos` is `None` when the POS source
    /// failed, leaving the stored total untouched.
    pub async fn merge_readonly(
        &self,
        key: &ReportKey,
        items: &[LineItem],
        pos: Option<&PosSummary>,
        actor: &str,
    ) -> Result<ReportDay, LedgerError> {
        Ok(self.merge_readonly_counted(key, items, pos, actor).await?.0)
    }

    /// `merge_readonly`, also returning how many audit entries the merge wrote.
    /// Zero means the stored ledger was left as it was.
    pub async fn merge_readonly_counted(
        &self,
        key: &ReportKey,
        items: &[LineItem],
        pos: Option<&PosSummary>,
        actor: &str,
    ) -> Result<(ReportDay, usize), LedgerError> {
        self.mutate(key, true, |day| {
            let mut entries = day.merge_readonly(items, actor)?;
            if let Some(pos) = pos {
                entries.extend(day.sync_pos(pos, actor)?);
            }
            Ok((entries.len(), entries))
        })
        .await
    }

    pub async fn add_editable(
        &self,
        key: &ReportKey,
        draft: &EditableDraft,
        actor: &str,
    ) -> Result<(ReportDay, Uuid), LedgerError> {
        self.mutate(key, false, |day| {
            let (id, entry) = day.add_editable(draft, actor)?;
            Ok((id, vec![entry]))
        })
        .await
    }

    pub async fn update_editable(
        &self,
        key: &ReportKey,
        item_id: Uuid,
        patch: &ItemPatch,
        actor: &str,
    ) -> Result<ReportDay, LedgerError> {
        let (day, ()) = self
            .mutate(key, false, |day| {
                Ok(((), vec![day.update_editable(item_id, patch, actor)?]))
            })
            .await?;
        Ok(day)
    }

    pub async fn remove_editable(
        &self,
        key: &ReportKey,
        item_id: Uuid,
        actor: &str,
    ) -> Result<ReportDay, LedgerError> {
        let (day, ()) = self
            .mutate(key, false, |day| Ok(((), vec![day.remove_editable(item_id, actor)?])))
            .await?;
        Ok(day)
    }

    pub async fn submit(
        &self,
        key: &ReportKey,
        input: &SubmitInput,
        actor: &str,
    ) -> Result<ReportDay, LedgerError> {
        let result = self
            .mutate(key, false, |day| Ok(((), vec![day.submit(input, actor)?])))
            .await;
        match &result {
            Ok((day, ())) => tracing::info!(
                terminal_id = %key.terminal_id,
                date = %key.date,
                actor,
                difference = day.difference,
                status = %day.status,
                "report submitted"
            ),
            Err(LedgerError::RequiresConfirmation { balance }) => tracing::info!(
                terminal_id = %key.terminal_id,
                date = %key.date,
                balance,
                "submit held: shortfall requires confirmation"
            ),
            Err(_) => {}
        }
        result.map(|(day, ())| day)
    }

    pub async fn review(
        &self,
        key: &ReportKey,
        decision: ReviewDecision,
        actor: &str,
    ) -> Result<ReportDay, LedgerError> {
        let (day, ()) = self
            .mutate(key, false, |day| Ok(((), vec![day.review(decision, actor)?])))
            .await?;
        tracing::info!(terminal_id = %key.terminal_id, date = %key.date, actor, status = %day.status, "report reviewed");
        Ok(day)
    }

    pub async fn reopen(&self, key: &ReportKey, actor: &str) -> Result<ReportDay, LedgerError> {
        let (day, ()) = self
            .mutate(key, false, |day| Ok(((), vec![day.reopen(actor)?])))
            .await?;
        tracing::info!(terminal_id = %key.terminal_id, date = %key.date, actor, "report reopened");
        Ok(day)
    }
}
