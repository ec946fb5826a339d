/// Migrating twice must be idempotent.
///
/// DB-backed test, skipped if KASSA_DATABASE_URL is not set.
#[tokio::test]
async fn migrate_idempotent_on_clean_db() -> anyhow::Result<()> {
    let url = match std::env::var(kassa_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: KASSA_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = kassa_db::connect(&url).await?;
    kassa_db::migrate(&pool).await?;
    kassa_db::migrate(&pool).await?;

    let st = kassa_db::status(&pool).await?;
    assert!(st.ok);
    assert!(st.has_ledger_tables);
    Ok(())
}
