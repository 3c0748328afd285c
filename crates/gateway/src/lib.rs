//! CoachScribe gateway.
//!
//! Request tier (axum API), job orchestrator, worker runtime, and the
//! composition root that wires the stores, quota evaluator, usage ledger,
//! STT registry, and blob gateway together.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
