//! `kassa fetch`: one aggregation pass against the live sources.
//!
//! Uses the database directory when `KASSA_DATABASE_URL` is set, otherwise
//! the static directory from config. The ledger is never touched.

use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use kassa_config::UnusedKeyPolicy;
use kassa_sources::{Aggregator, CredentialResolver, StaticDirectory};

pub async fn dry_run(
    config_paths: &[String],
    terminal_id: &str,
    date: NaiveDate,
    cutoff: Option<NaiveTime>,
) -> Result<()> {
    let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = kassa_config::load_layered_yaml(&path_refs)?;
    let unused = kassa_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for pointer in &unused.unused_leaf_pointers {
        eprintln!("warning: unused config key {}", pointer);
    }
    let cfg = loaded.settings()?;

    let secrets = kassa_config::secrets::resolve_secrets(&cfg)?;
    let adapters = kassa_sources::build_adapters(&cfg.sources, &secrets)?;

    let (resolver, workday) = if std::env::var(kassa_db::ENV_DB_URL).is_ok() {
        let pool = kassa_db::connect_from_env().await?;
        let workday = kassa_db::fetch_work_day(&pool, &cfg.workday).await?;
        (Arc::new(kassa_db::PgDirectory::new(pool)) as Arc<dyn CredentialResolver>, workday)
    } else {
        (
            Arc::new(StaticDirectory::from_config(&cfg.directory)) as Arc<dyn CredentialResolver>,
            cfg.workday.clone(),
        )
    };

    let aggregator = Aggregator::new(resolver, adapters);
    let out = aggregator.aggregate(&workday, terminal_id, date, cutoff).await?;

    println!("terminal_id={} date={}", terminal_id, date);
    match &out.pos {
        Some(pos) => println!("pos_total={} cash_ids={}", pos.total, pos.cash_ids.join(",")),
        None => println!("pos_total=unavailable"),
    }
    for item in &out.items {
        println!(
            "item source={} kind={} amount={} label={:?}{}",
            item.source,
            item.kind.as_str(),
            item.amount,
            item.label,
            item.fetch_error
                .as_deref()
                .map(|e| format!(" fetch_error={}", e))
                .unwrap_or_default()
        );
    }
    for failure in &out.errors {
        println!("error source={} {}", failure.source.as_str(), failure.error);
    }
    println!(
        "items={} succeeded={} errors={}",
        out.items.len(),
        out.succeeded.len(),
        out.errors.len()
    );
    Ok(())
}
