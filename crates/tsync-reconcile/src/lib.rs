//! tsync-reconcile
//!
//! Reconciliation Engine for per-client traffic counters.
//!
//! Given one remote panel snapshot and a read view of the local panel database,
//! computes the batch of writes that brings the local side up to the highest
//! known usage:
//! - `down` / `up` counters are only ever raised, never lowered
//! - a finite `total` quota is raised to a larger remote one
//! - an unlimited local quota (`0`) is never replaced by a finite remote one
//! - a client whose remote usage exceeds its final quota is disabled in the
//!   inbound settings document
//!
//! Deterministic, pure logic. No IO. No database or network calls.

mod engine;
mod settings;
mod types;

pub use engine::reconcile;
pub use settings::{EnforcementDoc, QuotaEntry};
pub use types::*;
