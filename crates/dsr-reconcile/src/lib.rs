//! dsr-reconcile
//!
//! Device status reconciliation engine.
//!
//! Architectural decisions:
//! - Feed validity is decided before any device is touched; an invalid run
//!   mutates nothing but its own verdict and `processed_at`.
//! - Present/new/absent is a fresh set difference per call. No "seen this
//!   run" marker is ever persisted.
//! - The missing-device flag is resolved once per call, up front.
//! - One call == one storage transaction. Only storage failures escalate.
//!
//! Planning (`plan_reconcile`) is pure deterministic logic. No IO, no clock.
//! IO happens only through the [`ReconcileStore`] / [`ReconcileTx`] seam.

mod engine;
mod flags;
mod gate;
mod mapper;
mod plan;
mod staging;
mod store;
mod types;

pub use engine::ReconciliationEngine;
pub use flags::{resolve_flag, FlagResolution, FlagSnapshot, FlagSource, MissingPolicy};
pub use gate::{BatchConsistencyGate, FeedValidity, FeedValidityGate, InvalidReason};
pub use mapper::{map_status, CarrierStatusMapper, StatusMapper};
pub use plan::{plan_reconcile, PlanInput, ReconcilePlan};
pub use staging::{collapse_duplicates, tenants_in};
pub use store::{ReconcileStore, ReconcileTx, RunCompletion};
pub use types::*;
