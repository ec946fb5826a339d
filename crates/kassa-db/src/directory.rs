//! Terminal/credential directory and process-wide settings.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kassa_config::WorkDay;
use kassa_schemas::Terminal;
use kassa_sources::{CredentialResolver, Credentials, KeyedByType, ResolvedTerminal, SourceError};
use sqlx::{PgPool, Row};

pub const SETTING_WORK_START: &str = "workStartTime";
pub const SETTING_WORK_END: &str = "workEndTime";

/// Owner kind of a `credentials` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialModel {
    Terminal,
    Organization,
}

impl CredentialModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialModel::Terminal => "terminal",
            CredentialModel::Organization => "organization",
        }
    }
}

/// Credential Resolver over the `terminals` and `credentials` tables.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn terminal(&self, terminal_id: &str) -> Result<Option<Terminal>> {
        let row = sqlx::query(
            r#"
            select id, organization_id, name, pos_group_id, timezone
            from terminals
            where id = $1
            "#,
        )
        .bind(terminal_id)
        .fetch_optional(&self.pool)
        .await
        .context("load terminal failed")?;

        row.map(|r| -> Result<Terminal> {
            Ok(Terminal {
                id: r.try_get("id")?,
                organization_id: r.try_get("organization_id")?,
                name: r.try_get("name")?,
                pos_group_id: r.try_get("pos_group_id")?,
                timezone: r.try_get("timezone")?,
            })
        })
        .transpose()
    }

    async fn organization_exists(&self, organization_id: &str) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("select exists (select 1 from organizations where id = $1)")
                .bind(organization_id)
                .fetch_one(&self.pool)
                .await
                .context("organization lookup failed")?;
        Ok(exists)
    }

    async fn keys(&self, model: CredentialModel, model_id: &str) -> Result<KeyedByType> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            select type, value
            from credentials
            where model = $1 and model_id = $2
            "#,
        )
        .bind(model.as_str())
        .bind(model_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("load {} credentials failed", model.as_str()))?;
        Ok(rows.into_iter().collect::<BTreeMap<_, _>>())
    }
}

#[async_trait]
impl CredentialResolver for PgDirectory {
    async fn resolve(&self, terminal_id: &str) -> Result<ResolvedTerminal, SourceError> {
        let unavailable = |e: anyhow::Error| SourceError::Unavailable(format!("directory: {e:#}"));

        let terminal = self
            .terminal(terminal_id)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| SourceError::NotFound(format!("terminal '{terminal_id}'")))?;
        if !self
            .organization_exists(&terminal.organization_id)
            .await
            .map_err(unavailable)?
        {
            return Err(SourceError::NotFound(format!(
                "organization '{}' of terminal '{terminal_id}'",
                terminal.organization_id
            )));
        }

        let credentials = Credentials {
            terminal: self
                .keys(CredentialModel::Terminal, &terminal.id)
                .await
                .map_err(unavailable)?,
            organization: self
                .keys(CredentialModel::Organization, &terminal.organization_id)
                .await
                .map_err(unavailable)?,
        };
        Ok(ResolvedTerminal { terminal, credentials })
    }
}

// ---------------------------------------------------------------------------
// settings
// ---------------------------------------------------------------------------

/// Business-day boundaries from `settings`, falling back to `fallback` for
/// keys that are absent. Values are hours (`6`) or `HH:MM` (`06:00`).
pub async fn fetch_work_day(pool: &PgPool, fallback: &WorkDay) -> Result<WorkDay> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("select key, value from settings where key = any($1)")
            .bind(vec![SETTING_WORK_START, SETTING_WORK_END])
            .fetch_all(pool)
            .await
            .context("load work-day settings failed")?;

    let mut out = fallback.clone();
    for (key, value) in rows {
        let hour = parse_hour(&value)
            .with_context(|| format!("settings.{key}='{value}' is not an hour of day"))?;
        match key.as_str() {
            SETTING_WORK_START => out.work_start_hour = hour,
            SETTING_WORK_END => out.work_end_hour = hour,
            _ => {}
        }
    }
    Ok(out)
}

fn parse_hour(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let hour = raw.split(':').next()?.parse::<u32>().ok()?;
    (hour <= 23).then_some(hour)
}

// ---------------------------------------------------------------------------
// seeding (CLI, tests)
// ---------------------------------------------------------------------------

pub async fn upsert_organization(pool: &PgPool, id: &str, name: &str) -> Result<()> {
    sqlx::query(
        r#"
        insert into organizations (id, name) values ($1, $2)
        on conflict (id) do update set name = excluded.name
        "#,
    )
    .bind(id)
    .bind(name)
    .execute(pool)
    .await
    .context("upsert organization failed")?;
    Ok(())
}

pub async fn upsert_terminal(pool: &PgPool, t: &Terminal) -> Result<()> {
    sqlx::query(
        r#"
        insert into terminals (id, organization_id, name, pos_group_id, timezone)
        values ($1, $2, $3, $4, $5)
        on conflict (id) do update set
          organization_id = excluded.organization_id,
          name = excluded.name,
          pos_group_id = excluded.pos_group_id,
          timezone = excluded.timezone
        "#,
    )
    .bind(&t.id)
    .bind(&t.organization_id)
    .bind(&t.name)
    .bind(&t.pos_group_id)
    .bind(&t.timezone)
    .execute(pool)
    .await
    .context("upsert terminal failed")?;
    Ok(())
}

pub async fn put_credential(
    pool: &PgPool,
    model: CredentialModel,
    model_id: &str,
    cred_type: &str,
    value: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into credentials (model, model_id, type, value) values ($1, $2, $3, $4)
        on conflict (model, model_id, type) do update set value = excluded.value
        "#,
    )
    .bind(model.as_str())
    .bind(model_id)
    .bind(cred_type)
    .bind(value)
    .execute(pool)
    .await
    .context("put credential failed")?;
    Ok(())
}

pub async fn put_setting(pool: &PgPool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        insert into settings (key, value) values ($1, $2)
        on conflict (key) do update set value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .context("put setting failed")?;
    Ok(())
}
