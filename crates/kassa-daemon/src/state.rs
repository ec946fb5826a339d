//! Shared runtime state for kassa-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum.

use std::sync::Arc;
use std::time::Duration;

use kassa_schemas::ReportStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::engine::{Engine, ReportView};

// ---------------------------------------------------------------------------
// BusMsg - SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        ts_millis: i64,
    },
    ReportChanged {
        terminal_id: String,
        date: chrono::NaiveDate,
        status: ReportStatus,
        balance: i64,
        actor: String,
    },
    LogLine {
        level: String,
        msg: String,
    },
}

impl BusMsg {
    pub fn report_changed(view: &ReportView, actor: &str) -> Self {
        BusMsg::ReportChanged {
            terminal_id: view.report.key.terminal_id.clone(),
            date: view.report.key.date,
            status: view.report.status,
            balance: view.balance,
            actor: actor.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
    /// "postgres" | "memory"
    pub store: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub engine: Engine,
    /// Enabled source ids, for health.
    pub sources: Vec<String>,
}

impl AppState {
    pub fn new(engine: Engine, store: &'static str, sources: Vec<String>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "kassa-daemon",
                version: env!("CARGO_PKG_VERSION"),
                store,
            },
            engine,
            sources,
        }
    }

    /// Fire-and-forget; no subscribers is fine.
    pub fn publish(&self, msg: BusMsg) {
        let _ = self.bus.send(msg);
    }
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
