//! kassa-audit
//!
//! Immutable before/after records of every ledger mutation and status
//! transition. Entries of one ledger form a hash chain: each entry carries
//! the previous entry's `hash_self` as `hash_prev`. An optional JSONL mirror
//! receives every committed entry, one canonical JSON object per line.
//!
//! There is no update or delete API.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use kassa_schemas::ReportKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// What happened to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Readonly item created or re-valued by aggregation.
    ItemMerged,
    ItemAdded,
    ItemUpdated,
    ItemRemoved,
    /// POS total / cash-shift references refreshed by aggregation.
    PosSynced,
    Submitted,
    Reviewed,
    Reopened,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ItemMerged => "item_merged",
            AuditAction::ItemAdded => "item_added",
            AuditAction::ItemUpdated => "item_updated",
            AuditAction::ItemRemoved => "item_removed",
            AuditAction::PosSynced => "pos_synced",
            AuditAction::Submitted => "submitted",
            AuditAction::Reviewed => "reviewed",
            AuditAction::Reopened => "reopened",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            AuditAction::ItemMerged,
            AuditAction::ItemAdded,
            AuditAction::ItemUpdated,
            AuditAction::ItemRemoved,
            AuditAction::PosSynced,
            AuditAction::Submitted,
            AuditAction::Reviewed,
            AuditAction::Reopened,
        ]
        .into_iter()
        .find(|a| a.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub report_id: Uuid,
    pub terminal_id: String,
    pub report_date: NaiveDate,
    /// Set for item-scoped entries.
    pub item_id: Option<Uuid>,
    pub action: AuditAction,
    /// `None` when the item did not exist before (add / first merge).
    pub before: Option<Value>,
    /// `None` when the item no longer exists (remove).
    pub after: Option<Value>,
    pub actor: String,
    pub ts_utc: DateTime<Utc>,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

impl AuditEntry {
    /// Build an unsealed entry. Call [`seal`] to link it into the ledger's chain.
    pub fn record(
        key: &ReportKey,
        report_id: Uuid,
        item_id: Option<Uuid>,
        action: AuditAction,
        before: Option<Value>,
        after: Option<Value>,
        actor: &str,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            report_id,
            terminal_id: key.terminal_id.clone(),
            report_date: key.date,
            item_id,
            action,
            before,
            after,
            actor: actor.to_string(),
            // Microsecond precision survives a Postgres round-trip, so the hash does too.
            ts_utc: Utc::now().trunc_subsecs(6),
            hash_prev: None,
            hash_self: None,
        }
    }
}

/// Link `entry` after `prev` and return its own hash (the new chain head).
pub fn seal(entry: &mut AuditEntry, prev: Option<String>) -> Result<String> {
    entry.hash_prev = prev;
    entry.hash_self = None;
    let h = compute_entry_hash(entry)?;
    entry.hash_self = Some(h.clone());
    Ok(h)
}

/// Hash is computed from canonical JSON of the entry WITHOUT hash_self.
pub fn compute_entry_hash(entry: &AuditEntry) -> Result<String> {
    let mut clone = entry.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit entry failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

// ---------------------------------------------------------------------------
// JSONL mirror
// ---------------------------------------------------------------------------

/// Append-only JSONL mirror of committed audit entries.
pub struct AuditWriter {
    path: PathBuf,
    lines: u64,
}

impl AuditWriter {
    /// Creates the writer and ensures parent dirs exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }
        Ok(Self { path, lines: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines written by this writer instance.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn append(&mut self, entry: &AuditEntry) -> Result<()> {
        let line = canonical_json_line(entry)?;
        append_line(&self.path, &line)?;
        self.lines += 1;
        Ok(())
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// Every ledger's chain is intact.
    Valid { entries: usize },
    /// A chain is broken at the given (1-based) position.
    Broken { position: usize, reason: String },
}

/// Verify the chains of a JSONL mirror file. Entries of different ledgers
/// may be interleaved; each ledger's chain is checked independently.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut entries = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit entry at line {}", i + 1))?;
        entries.push(entry);
    }
    verify_entries(&entries)
}

/// Verify chains over entries in commit order.
pub fn verify_entries(entries: &[AuditEntry]) -> Result<VerifyResult> {
    let mut heads: HashMap<Uuid, Option<String>> = HashMap::new();

    for (i, entry) in entries.iter().enumerate() {
        // Unsealed entries (hash chain disabled) are not verifiable; skip them.
        let Some(claimed) = entry.hash_self.as_ref() else {
            continue;
        };

        let expected_prev = heads.get(&entry.report_id).cloned().flatten();
        if entry.hash_prev != expected_prev {
            return Ok(VerifyResult::Broken {
                position: i + 1,
                reason: format!(
                    "hash_prev mismatch for report {}: expected {:?}, got {:?}",
                    entry.report_id, expected_prev, entry.hash_prev
                ),
            });
        }

        let recomputed = compute_entry_hash(entry)?;
        if *claimed != recomputed {
            return Ok(VerifyResult::Broken {
                position: i + 1,
                reason: format!(
                    "hash_self mismatch: claimed {}, recomputed {}",
                    claimed, recomputed
                ),
            });
        }

        heads.insert(entry.report_id, Some(recomputed));
    }

    Ok(VerifyResult::Valid {
        entries: entries.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> ReportKey {
        ReportKey::new("T1", NaiveDate::from_ymd_opt(2026, 3, 1).unwrap())
    }

    #[test]
    fn seal_links_entries() {
        let report_id = Uuid::new_v4();
        let mut a = AuditEntry::record(
            &key(),
            report_id,
            None,
            AuditAction::Submitted,
            Some(json!({"status": "draft"})),
            Some(json!({"status": "checking"})),
            "alice",
        );
        let head = seal(&mut a, None).unwrap();
        assert_eq!(a.hash_self.as_deref(), Some(head.as_str()));
        assert!(a.hash_prev.is_none());

        let mut b = AuditEntry::record(
            &key(),
            report_id,
            None,
            AuditAction::Reviewed,
            None,
            None,
            "bob",
        );
        seal(&mut b, Some(head.clone())).unwrap();
        assert_eq!(b.hash_prev, Some(head));

        assert_eq!(
            verify_entries(&[a, b]).unwrap(),
            VerifyResult::Valid { entries: 2 }
        );
    }

    #[test]
    fn action_round_trips_through_str() {
        assert_eq!(AuditAction::parse("item_removed"), Some(AuditAction::ItemRemoved));
        assert_eq!(AuditAction::parse("nope"), None);
    }
}
