//! kassa-ledger
//!
//! The terminal-day ledger, its line-item operations and the submission
//! workflow that gates mutability. Pure operations live on [`ReportDay`];
//! [`LedgerService`] serializes them per key, seals their audit entries into
//! the hash chain and commits through a [`LedgerStore`].

mod error;
mod model;
mod service;
mod store;
mod workflow;

pub use error::LedgerError;
pub use model::{item_snapshot, EditableDraft, ItemPatch, ReportDay, SYSTEM_ACTOR};
pub use service::LedgerService;
pub use store::{InMemoryLedgerStore, LedgerStore};
pub use workflow::{ReviewDecision, SubmitInput};
