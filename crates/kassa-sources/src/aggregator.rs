//! Concurrent fan-out over all source adapters for one terminal-day.

use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use futures_util::future::join_all;
use kassa_config::WorkDay;
use kassa_schemas::{ItemKind, LineItem, PosSummary, SourceKind};
use serde::Serialize;

use crate::adapter::{SourceAdapter, SourceRequest};
use crate::error::SourceError;
use crate::resolver::CredentialResolver;
use crate::window::BusinessWindow;

/// One source that could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: SourceKind,
    pub error: SourceError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateOutcome {
    /// Readonly items of every income source; failed ones as zero placeholders.
    pub items: Vec<LineItem>,
    /// `None` when the POS source failed or is not configured.
    pub pos: Option<PosSummary>,
    pub errors: Vec<SourceFailure>,
    /// Sources that answered in time.
    pub succeeded: Vec<SourceKind>,
}

pub struct Aggregator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    resolver: Arc<dyn CredentialResolver>,
}

impl Aggregator {
    pub fn new(resolver: Arc<dyn CredentialResolver>, adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { adapters, resolver }
    }

    pub fn sources(&self) -> Vec<SourceKind> {
        self.adapters.iter().map(|a| a.kind()).collect()
    }

    /// Fetch every source concurrently, each under its own deadline.
    ///
    /// Only credential resolution and window construction can fail the call;
    /// per-source failures are folded into the outcome. Returns once every
    /// adapter has answered or hit its deadline. No retries happen here.
    pub async fn aggregate(
        &self,
        workday: &WorkDay,
        terminal_id: &str,
        date: NaiveDate,
        cutoff: Option<NaiveTime>,
    ) -> Result<AggregateOutcome, SourceError> {
        let resolved = self.resolver.resolve(terminal_id).await?;
        let window = BusinessWindow::for_day(workday, resolved.terminal.timezone.as_deref(), date, cutoff)?;
        let req = SourceRequest {
            terminal: resolved.terminal,
            credentials: resolved.credentials,
            date,
            window,
        };

        let started = Instant::now();
        let results = join_all(self.adapters.iter().map(|adapter| {
            let req = &req;
            async move {
                let t0 = Instant::now();
                let deadline = adapter.timeout();
                let result = match tokio::time::timeout(deadline, adapter.fetch(req)).await {
                    Ok(r) => r,
                    Err(_) => Err(SourceError::Timeout {
                        after_ms: deadline.as_millis() as u64,
                    }),
                };
                (adapter.kind(), result, t0.elapsed().as_millis() as u64)
            }
        }))
        .await;

        let mut out = AggregateOutcome::default();
        for (source, result, elapsed_ms) in results {
            match result {
                Ok(fetched) => {
                    tracing::debug!(terminal_id, %date, %source, elapsed_ms, items = fetched.items.len(), "source fetched");
                    out.items.extend(fetched.items.into_iter().filter(|i| i.readonly));
                    if source == SourceKind::Pos {
                        out.pos = fetched.pos;
                    }
                    out.succeeded.push(source);
                }
                Err(error) => {
                    tracing::warn!(terminal_id, %date, %source, elapsed_ms, error = %error, "source fetch failed");
                    if source != SourceKind::Pos {
                        out.items
                            .push(LineItem::placeholder(ItemKind::Income, source, error.marker()));
                    }
                    out.errors.push(SourceFailure { source, error });
                }
            }
        }

        tracing::info!(
            terminal_id,
            %date,
            ok = out.succeeded.len(),
            failed = out.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "aggregation finished"
        );
        Ok(out)
    }
}
