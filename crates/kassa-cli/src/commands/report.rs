//! `kassa report show|history`: read-only views of stored ledgers.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use kassa_ledger::LedgerService;
use kassa_schemas::ReportKey;
use sqlx::PgPool;

fn service(pool: PgPool) -> LedgerService {
    LedgerService::new(Arc::new(kassa_db::PgLedgerStore::new(pool)))
}

pub async fn show(pool: PgPool, terminal_id: &str, date: NaiveDate) -> Result<()> {
    let key = ReportKey::new(terminal_id, date);
    let day = service(pool).get(&key).await?;

    println!("report_id={}", day.id);
    println!("status={}", day.status.as_str());
    println!("pos_total={}", day.pos_total);
    println!("total_income={}", day.total_income());
    println!("total_expenses={}", day.total_expenses());
    println!("withdraws={}", day.withdraws());
    println!("balance={}", day.balance());
    println!("audit_head={}", day.audit_head.as_deref().unwrap_or(""));
    for item in &day.items {
        println!(
            "item id={} kind={} readonly={} amount={} source={} label={:?}",
            item.id,
            item.kind.as_str(),
            item.readonly,
            item.amount,
            item.source,
            item.label
        );
    }
    Ok(())
}

pub async fn history(pool: PgPool, terminal_id: &str, date: NaiveDate) -> Result<()> {
    let key = ReportKey::new(terminal_id, date);
    let entries = service(pool).history(&key).await?;
    for e in &entries {
        println!(
            "{} {} actor={} item={}",
            e.ts_utc.to_rfc3339(),
            e.action.as_str(),
            e.actor,
            e.item_id.map(|id| id.to_string()).unwrap_or_default()
        );
    }
    let verdict = kassa_audit::verify_entries(&entries).context("verify ledger audit chain")?;
    println!("entries={} chain={:?}", entries.len(), verdict);
    Ok(())
}
