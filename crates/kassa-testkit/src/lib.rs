//! kassa-testkit
//!
//! Scripted source adapters and a fixture directory for driving the
//! aggregator, ledger and daemon without any upstream system.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use kassa_ledger::{InMemoryLedgerStore, LedgerService};
use kassa_schemas::{ItemKind, LineItem, PosSummary, ReportKey, SourceKind, Terminal};
use kassa_sources::{
    Aggregator, CredentialResolver, SourceAdapter, SourceError, SourceFetch, SourceRequest, StaticDirectory,
};

pub const TERMINAL_ID: &str = "T1";
pub const ORGANIZATION_ID: &str = "O1";

/// 2026-04-02, the day every scenario reconciles.
pub fn scenario_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 4, 2).unwrap_or_default()
}

pub fn scenario_key() -> ReportKey {
    ReportKey::new(TERMINAL_ID, scenario_date())
}

pub fn fixture_terminal() -> Terminal {
    Terminal {
        id: TERMINAL_ID.to_string(),
        organization_id: ORGANIZATION_ID.to_string(),
        name: "Chilonzor".to_string(),
        pos_group_id: Some("G-1".to_string()),
        timezone: None,
    }
}

/// Directory with the single fixture terminal and its organization.
pub fn fixture_directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_organization(ORGANIZATION_ID, BTreeMap::new())
        .with_terminal(fixture_terminal(), BTreeMap::new())
}

// ---------------------------------------------------------------------------
// ScriptedAdapter
// ---------------------------------------------------------------------------

/// What a [`ScriptedAdapter`] answers.
#[derive(Debug, Clone)]
pub enum Script {
    Answer(SourceFetch),
    Fail(SourceError),
    /// Never answers; the aggregator's deadline has to cut it off.
    Hang,
}

/// A source adapter that replays a fixed answer, optionally after a delay.
#[derive(Debug)]
pub struct ScriptedAdapter {
    kind: SourceKind,
    timeout: Duration,
    delay: Duration,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(kind: SourceKind, script: Script) -> Self {
        Self {
            kind,
            timeout: Duration::from_secs(5),
            delay: Duration::ZERO,
            script,
            calls: AtomicUsize::new(0),
        }
    }

    /// Single readonly income item of `amount`.
    pub fn income(kind: SourceKind, amount: i64) -> Self {
        Self::new(kind, Script::Answer(SourceFetch::income(kind, amount)))
    }

    /// POS answer carrying `total` and the shift ids.
    pub fn pos(total: i64, cash_ids: &[&str]) -> Self {
        Self::new(
            SourceKind::Pos,
            Script::Answer(SourceFetch {
                items: Vec::new(),
                pos: Some(PosSummary {
                    total,
                    cash_ids: cash_ids.iter().map(|s| s.to_string()).collect(),
                }),
            }),
        )
    }

    /// Courier answer: an income total plus itemized withdraws.
    pub fn courier(total: i64, withdraws: &[(&str, i64)]) -> Self {
        let mut fetch = SourceFetch::income(SourceKind::Courier, total);
        for (party, amount) in withdraws {
            fetch
                .items
                .push(LineItem::readonly(ItemKind::Withdraw, SourceKind::Courier, *party, *amount));
        }
        Self::new(SourceKind::Courier, Script::Answer(fetch))
    }

    pub fn failing(kind: SourceKind, error: SourceError) -> Self {
        Self::new(kind, Script::Fail(error))
    }

    pub fn hanging(kind: SourceKind) -> Self {
        Self::new(kind, Script::Hang)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, _req: &SourceRequest) -> Result<SourceFetch, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            Script::Answer(fetch) => Ok(fetch.clone()),
            Script::Fail(err) => Err(err.clone()),
            Script::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario fixtures
// ---------------------------------------------------------------------------

/// The five-source answer set of the reference day: POS 10,000,000; card
/// 2,000,000; click 1,000,000; marketplace 3,000,000; courier 500,000.
pub fn reference_day_adapters() -> Vec<Arc<ScriptedAdapter>> {
    vec![
        Arc::new(ScriptedAdapter::pos(10_000_000, &["shift-1", "shift-2"])),
        Arc::new(ScriptedAdapter::income(SourceKind::CardGateway, 2_000_000)),
        Arc::new(ScriptedAdapter::income(SourceKind::ClickGateway, 1_000_000)),
        Arc::new(ScriptedAdapter::income(SourceKind::Marketplace, 3_000_000)),
        Arc::new(ScriptedAdapter::income(SourceKind::Courier, 500_000)),
    ]
}

pub fn aggregator_over(adapters: &[Arc<ScriptedAdapter>]) -> Aggregator {
    let resolver: Arc<dyn CredentialResolver> = Arc::new(fixture_directory());
    let adapters = adapters
        .iter()
        .map(|a| Arc::clone(a) as Arc<dyn SourceAdapter>)
        .collect();
    Aggregator::new(resolver, adapters)
}

/// Ledger service over a fresh in-memory store, returned with the store.
pub fn in_memory_ledger() -> (LedgerService, Arc<InMemoryLedgerStore>) {
    let store = Arc::new(InMemoryLedgerStore::new());
    (LedgerService::new(store.clone()), store)
}
