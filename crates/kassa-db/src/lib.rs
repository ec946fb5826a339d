//! kassa-db
//!
//! PostgreSQL persistence for the reconciliation engine: the ledger store,
//! the append-only audit rows, and the terminal/credential directory.

mod directory;
mod ledger;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub use directory::{
    fetch_work_day, put_credential, put_setting, upsert_organization, upsert_terminal, CredentialModel,
    PgDirectory, SETTING_WORK_END, SETTING_WORK_START,
};
pub use ledger::PgLedgerStore;

pub const ENV_DB_URL: &str = "KASSA_DATABASE_URL";

/// Connect to Postgres using KASSA_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'report_days'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_ledger_tables: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_ledger_tables: bool,
}
