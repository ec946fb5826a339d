//! kassa-daemon entry point.
//!
//! Sets up tracing, loads config, picks the Postgres or in-memory backend,
//! wires middleware, and starts the HTTP server. Route handlers live in
//! `routes.rs`; shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use kassa_audit::AuditWriter;
use kassa_config::{KassaConfig, UnusedKeyPolicy};
use kassa_daemon::{
    engine::{Engine, PgWorkDay, StaticWorkDay, WorkDaySource},
    routes, state,
};
use kassa_ledger::{InMemoryLedgerStore, LedgerService, LedgerStore};
use kassa_sources::{Aggregator, CachedResolver, CredentialResolver, StaticDirectory};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

const ENV_CONFIG: &str = "KASSA_CONFIG";
const DEFAULT_CONFIG: &str = "config/base.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let (cfg, config_hash) = load_config()?;
    info!(config_hash = %config_hash, "config loaded");

    let secrets = kassa_config::secrets::resolve_secrets(&cfg)?;
    let adapters = kassa_sources::build_adapters(&cfg.sources, &secrets)?;

    let (store, resolver, workday, backend): (
        Arc<dyn LedgerStore>,
        Arc<dyn CredentialResolver>,
        Arc<dyn WorkDaySource>,
        &'static str,
    ) = if std::env::var(kassa_db::ENV_DB_URL).is_ok() {
        let pool = kassa_db::connect_from_env().await?;
        kassa_db::migrate(&pool).await?;
        (
            Arc::new(kassa_db::PgLedgerStore::new(pool.clone())) as Arc<dyn LedgerStore>,
            Arc::new(CachedResolver::new(
                kassa_db::PgDirectory::new(pool.clone()),
                Duration::from_secs(cfg.daemon.directory_cache_secs),
            )) as Arc<dyn CredentialResolver>,
            Arc::new(PgWorkDay {
                pool,
                fallback: cfg.workday.clone(),
            }) as Arc<dyn WorkDaySource>,
            "postgres",
        )
    } else {
        warn!("{} not set; ledgers are kept in memory", kassa_db::ENV_DB_URL);
        (
            Arc::new(InMemoryLedgerStore::new()) as Arc<dyn LedgerStore>,
            Arc::new(StaticDirectory::from_config(&cfg.directory)) as Arc<dyn CredentialResolver>,
            Arc::new(StaticWorkDay(cfg.workday.clone())) as Arc<dyn WorkDaySource>,
            "memory",
        )
    };

    let mut ledger = LedgerService::new(store).with_hash_chain(cfg.audit.hash_chain);
    if let Some(path) = &cfg.audit.jsonl_path {
        ledger = ledger.with_mirror(AuditWriter::new(path)?);
        info!(path = %path, "audit mirror enabled");
    }

    let aggregator = Aggregator::new(resolver, adapters);
    let sources = aggregator.sources().iter().map(|k| k.as_str().to_string()).collect();
    let engine = Engine::new(aggregator, ledger, workday);

    let shared = Arc::new(state::AppState::new(engine, backend, sources));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr(&cfg)?;
    info!("kassa-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// `KASSA_CONFIG` is a comma-separated list of YAML layers, base first.
/// Without it the default file is used when present, otherwise defaults.
fn load_config() -> anyhow::Result<(KassaConfig, String)> {
    let paths: Vec<String> = match std::env::var(ENV_CONFIG) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Err(_) if std::path::Path::new(DEFAULT_CONFIG).exists() => vec![DEFAULT_CONFIG.to_string()],
        Err(_) => Vec::new(),
    };
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = kassa_config::load_layered_yaml(&refs)?;

    let report = kassa_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for pointer in &report.unused_leaf_pointers {
        warn!(pointer = %pointer, "unused config key");
    }

    Ok((loaded.settings()?, loaded.config_hash))
}

fn bind_addr(cfg: &KassaConfig) -> anyhow::Result<SocketAddr> {
    let raw = std::env::var("KASSA_DAEMON_ADDR").unwrap_or_else(|_| cfg.daemon.addr.clone());
    raw.parse()
        .with_context(|| format!("invalid daemon address '{raw}'"))
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
