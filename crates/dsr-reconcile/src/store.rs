//! Storage seam for the engine.
//!
//! A store hands out transactions; every method on [`ReconcileTx`] runs inside
//! the one transaction opened for the call. Nothing written through a tx is
//! visible to other readers until `commit` returns, and dropping a tx without
//! committing discards everything it wrote.

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use dsr_schemas::{
    AuditEntry, Device, FeatureFlag, FeedRun, StagingRecord, TenantId, TenantVerdict,
};

/// What the engine writes when a call finishes: the run row plus one verdict
/// row per tenant the call covered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunCompletion {
    pub run_id: Uuid,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    /// Added to the run's existing counter.
    pub unknown_flips: u64,
    pub processed_at: DateTime<Utc>,
    /// Upserted on (run, tenant). Rows for other tenants are left alone.
    pub tenants: Vec<TenantVerdict>,
}

#[async_trait::async_trait]
pub trait ReconcileStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ReconcileTx>>;
}

#[async_trait::async_trait]
pub trait ReconcileTx: Send {
    /// Load and lock the run row.
    async fn load_run(&mut self, run_id: Uuid) -> Result<Option<FeedRun>>;

    /// All staging rows for the run, every tenant.
    async fn load_staging(&mut self, run_id: Uuid) -> Result<Vec<StagingRecord>>;

    /// Serialize against other calls touching any of these tenants. Held until
    /// commit/rollback.
    async fn lock_tenants(&mut self, tenants: &BTreeSet<TenantId>) -> Result<()>;

    /// Verdicts earlier calls recorded for the run, every tenant.
    async fn load_tenant_verdicts(&mut self, run_id: Uuid) -> Result<Vec<TenantVerdict>>;

    /// Every row for `key` (global and tenant-scoped).
    async fn load_flags(&mut self, key: &str) -> Result<Vec<FeatureFlag>>;

    async fn load_devices(&mut self, tenants: &BTreeSet<TenantId>) -> Result<Vec<Device>>;

    async fn insert_devices(&mut self, devices: &[Device]) -> Result<()>;

    async fn update_devices(&mut self, devices: &[Device]) -> Result<()>;

    /// Append-only. Implementations must never overwrite an existing entry.
    async fn append_audit(&mut self, entries: &[AuditEntry]) -> Result<()>;

    async fn finish_run(&mut self, completion: &RunCompletion) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}
