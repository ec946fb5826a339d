//! [`LedgerStore`] over `report_days`, `line_items` and `audit_entries`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use kassa_audit::{AuditAction, AuditEntry};
use kassa_ledger::{LedgerStore, ReportDay};
use kassa_schemas::{ItemKind, LineItem, ReportKey, ReportStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load(&self, key: &ReportKey) -> Result<Option<ReportDay>> {
        let row = sqlx::query(
            r#"
            select id, terminal_id, report_date, status, pos_total, cash_ids,
                   total_amount, total_manager_price, difference, arryt_income,
                   created_at, updated_at
            from report_days
            where terminal_id = $1 and report_date = $2
            "#,
        )
        .bind(&key.terminal_id)
        .bind(key.date)
        .fetch_optional(&self.pool)
        .await
        .context("load report_day failed")?;

        let Some(row) = row else { return Ok(None) };
        let mut day = report_from_row(&row)?;

        let items = sqlx::query(
            r#"
            select id, kind, label, amount, source, readonly, group_id, fetch_error
            from line_items
            where report_id = $1 and report_date = $2
            order by position
            "#,
        )
        .bind(day.id)
        .bind(day.key.date)
        .fetch_all(&self.pool)
        .await
        .context("load line_items failed")?;
        day.items = items.iter().map(item_from_row).collect::<Result<_>>()?;

        let head: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            select hash_self
            from audit_entries
            where report_id = $1 and report_date = $2
            order by seq desc
            limit 1
            "#,
        )
        .bind(day.id)
        .bind(day.key.date)
        .fetch_optional(&self.pool)
        .await
        .context("load audit head failed")?;
        day.audit_head = head.and_then(|(h,)| h);

        Ok(Some(day))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn get(&self, key: &ReportKey) -> Result<Option<ReportDay>> {
        self.load(key).await
    }

    async fn get_or_create(&self, key: &ReportKey) -> Result<ReportDay> {
        let fresh = ReportDay::new(key.clone());
        // Concurrent first fetches race on the unique (terminal_id, report_date).
        sqlx::query(
            r#"
            insert into report_days (id, terminal_id, report_date, status, created_at, updated_at)
            values ($1, $2, $3, $4, $5, $6)
            on conflict (terminal_id, report_date) do nothing
            "#,
        )
        .bind(fresh.id)
        .bind(&key.terminal_id)
        .bind(key.date)
        .bind(fresh.status.as_str())
        .bind(fresh.created_at)
        .bind(fresh.updated_at)
        .execute(&self.pool)
        .await
        .context("insert report_day failed")?;

        self.load(key)
            .await?
            .ok_or_else(|| anyhow!("report {key} vanished after insert"))
    }

    async fn commit(&self, day: &ReportDay, entries: &[AuditEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin commit tx failed")?;

        upsert_report(&mut tx, day).await?;

        let keep: Vec<Uuid> = day.items.iter().map(|i| i.id).collect();
        sqlx::query(
            r#"
            delete from line_items
            where report_id = $1 and report_date = $2 and not (id = any($3))
            "#,
        )
        .bind(day.id)
        .bind(day.key.date)
        .bind(&keep)
        .execute(&mut *tx)
        .await
        .context("prune line_items failed")?;

        for (pos, item) in day.items.iter().enumerate() {
            upsert_item(&mut tx, day, item, pos as i32).await?;
        }
        for entry in entries {
            insert_audit(&mut tx, entry).await?;
        }

        tx.commit().await.context("commit tx failed")?;
        Ok(())
    }

    async fn history(&self, key: &ReportKey) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            select id, report_id, report_date, terminal_id, item_id, action,
                   before, after, actor, ts_utc, hash_prev, hash_self
            from audit_entries
            where terminal_id = $1 and report_date = $2
            order by seq
            "#,
        )
        .bind(&key.terminal_id)
        .bind(key.date)
        .fetch_all(&self.pool)
        .await
        .context("load audit history failed")?;

        rows.iter().map(audit_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// writes
// ---------------------------------------------------------------------------

async fn upsert_report(tx: &mut Transaction<'_, Postgres>, day: &ReportDay) -> Result<()> {
    let cash_ids = serde_json::to_value(&day.cash_ids).context("encode cash_ids")?;
    sqlx::query(
        r#"
        insert into report_days (
          id, terminal_id, report_date, status, pos_total, cash_ids,
          total_amount, total_manager_price, difference, arryt_income,
          created_at, updated_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        on conflict (id, report_date) do update set
          status = excluded.status,
          pos_total = excluded.pos_total,
          cash_ids = excluded.cash_ids,
          total_amount = excluded.total_amount,
          total_manager_price = excluded.total_manager_price,
          difference = excluded.difference,
          arryt_income = excluded.arryt_income,
          updated_at = excluded.updated_at
        "#,
    )
    .bind(day.id)
    .bind(&day.key.terminal_id)
    .bind(day.key.date)
    .bind(day.status.as_str())
    .bind(day.pos_total)
    .bind(cash_ids)
    .bind(day.total_amount)
    .bind(day.total_manager_price)
    .bind(day.difference)
    .bind(day.arryt_income)
    .bind(day.created_at)
    .bind(day.updated_at)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("upsert report_day {} failed", day.key))?;
    Ok(())
}

async fn upsert_item(
    tx: &mut Transaction<'_, Postgres>,
    day: &ReportDay,
    item: &LineItem,
    position: i32,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into line_items (
          id, report_id, report_date, kind, label, amount, source, readonly,
          group_id, fetch_error, position
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        on conflict (id, report_date) do update set
          label = excluded.label,
          amount = excluded.amount,
          group_id = excluded.group_id,
          fetch_error = excluded.fetch_error,
          position = excluded.position
        "#,
    )
    .bind(item.id)
    .bind(day.id)
    .bind(day.key.date)
    .bind(item.kind.as_str())
    .bind(&item.label)
    .bind(item.amount)
    .bind(&item.source)
    .bind(item.readonly)
    .bind(&item.group_id)
    .bind(&item.fetch_error)
    .bind(position)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("upsert line_item {} failed", item.id))?;
    Ok(())
}

async fn insert_audit(tx: &mut Transaction<'_, Postgres>, e: &AuditEntry) -> Result<()> {
    sqlx::query(
        r#"
        insert into audit_entries (
          id, report_id, report_date, terminal_id, item_id, action,
          before, after, actor, ts_utc, hash_prev, hash_self
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(e.entry_id)
    .bind(e.report_id)
    .bind(e.report_date)
    .bind(&e.terminal_id)
    .bind(e.item_id)
    .bind(e.action.as_str())
    .bind(&e.before)
    .bind(&e.after)
    .bind(&e.actor)
    .bind(e.ts_utc)
    .bind(&e.hash_prev)
    .bind(&e.hash_self)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("insert audit_entry {} failed", e.entry_id))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// row decoding
// ---------------------------------------------------------------------------

fn report_from_row(row: &PgRow) -> Result<ReportDay> {
    let status: String = row.try_get("status")?;
    let cash_ids: serde_json::Value = row.try_get("cash_ids")?;
    Ok(ReportDay {
        id: row.try_get("id")?,
        key: ReportKey::new(row.try_get::<String, _>("terminal_id")?, row.try_get("report_date")?),
        status: ReportStatus::parse(&status).ok_or_else(|| anyhow!("invalid report status: {status}"))?,
        pos_total: row.try_get("pos_total")?,
        cash_ids: serde_json::from_value(cash_ids).context("decode cash_ids")?,
        items: Vec::new(),
        total_amount: row.try_get("total_amount")?,
        total_manager_price: row.try_get("total_manager_price")?,
        difference: row.try_get("difference")?,
        arryt_income: row.try_get("arryt_income")?,
        audit_head: None,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<LineItem> {
    let kind: String = row.try_get("kind")?;
    Ok(LineItem {
        id: row.try_get("id")?,
        kind: ItemKind::parse(&kind).ok_or_else(|| anyhow!("invalid line item kind: {kind}"))?,
        label: row.try_get("label")?,
        amount: row.try_get("amount")?,
        source: row.try_get("source")?,
        readonly: row.try_get("readonly")?,
        group_id: row.try_get("group_id")?,
        fetch_error: row.try_get("fetch_error")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditEntry> {
    let action: String = row.try_get("action")?;
    Ok(AuditEntry {
        entry_id: row.try_get("id")?,
        report_id: row.try_get("report_id")?,
        terminal_id: row.try_get("terminal_id")?,
        report_date: row.try_get("report_date")?,
        item_id: row.try_get("item_id")?,
        action: AuditAction::parse(&action).ok_or_else(|| anyhow!("invalid audit action: {action}"))?,
        before: row.try_get("before")?,
        after: row.try_get("after")?,
        actor: row.try_get("actor")?,
        ts_utc: row.try_get("ts_utc")?,
        hash_prev: row.try_get("hash_prev")?,
        hash_self: row.try_get("hash_self")?,
    })
}
