//! Orchestration: the recompute pipeline over the repository and engine.

pub mod service;
pub mod single_flight;

pub use service::{LedgerService, ScopeOutcome};
pub use single_flight::SingleFlight;
