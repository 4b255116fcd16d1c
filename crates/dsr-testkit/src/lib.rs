//! dsr-testkit
//!
//! In-memory, transactional implementation of the engine's storage seam plus
//! fixture builders. Lets every reconciliation property be exercised without
//! a database.
//!
//! No wall-clock reads: every timestamp comes from the fixed clock in
//! [`fixtures`] or is passed by the caller. Run ids from [`fixtures::run`] are
//! random v4 UUIDs, so tests compare runs by id, never by literal value.

pub mod fixtures;
mod memory;

pub use memory::{FailPoint, MemoryState, MemoryStore, MemoryTx};
