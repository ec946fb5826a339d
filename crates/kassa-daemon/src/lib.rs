//! kassa-daemon library target.
//!
//! Exposes the engine, router and state for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod engine;
pub mod routes;
pub mod state;
