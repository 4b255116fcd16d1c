//! `MemoryStore`: whole-state snapshot transactions.
//!
//! `begin` takes the state mutex for the life of the transaction and works on
//! a private copy. `commit` swaps the copy in; anything else (rollback, drop,
//! injected failure) discards it. Holding the mutex serializes every
//! transaction, which is a superset of per-tenant serialization.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use dsr_reconcile::{ReconcileStore, ReconcileTx, RunCompletion};
use dsr_schemas::{
    AuditEntry, Device, DeviceKey, EffectiveStatus, FeatureFlag, FeedRun, RunSummary,
    StagingRecord, TenantId, TenantVerdict,
};

/// Where the next transaction should fail. One-shot: consumed by the next
/// `begin`, whether or not the transaction reaches that step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    LoadRun,
    LoadStaging,
    LockTenants,
    LoadTenantVerdicts,
    LoadFlags,
    LoadDevices,
    InsertDevices,
    UpdateDevices,
    AppendAudit,
    FinishRun,
    Commit,
}

/// Everything the store holds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryState {
    pub runs: BTreeMap<Uuid, FeedRun>,
    pub staging: Vec<StagingRecord>,
    pub devices: BTreeMap<DeviceKey, Device>,
    pub audit: Vec<AuditEntry>,
    pub flags: Vec<FeatureFlag>,
    pub verdicts: BTreeMap<(Uuid, TenantId), TenantVerdict>,
    next_staging_seq: i64,
    fail_point: Option<FailPoint>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot failure for the next transaction.
    pub async fn fail_next(&self, point: FailPoint) {
        self.state.lock().await.fail_point = Some(point);
    }

    pub async fn insert_run(&self, run: FeedRun) -> Result<()> {
        let mut st = self.state.lock().await;
        if st.runs.contains_key(&run.run_id) {
            bail!("feed run {} already exists", run.run_id);
        }
        st.runs.insert(run.run_id, run);
        Ok(())
    }

    /// Stage records in order, assigning `staging_seq`. The run must exist.
    pub async fn stage(&self, records: Vec<StagingRecord>) -> Result<Vec<i64>> {
        let mut st = self.state.lock().await;
        let mut seqs = Vec::with_capacity(records.len());
        for mut rec in records {
            if !st.runs.contains_key(&rec.run_id) {
                bail!("staging for unknown feed run {}", rec.run_id);
            }
            st.next_staging_seq += 1;
            rec.staging_seq = st.next_staging_seq;
            seqs.push(rec.staging_seq);
            st.staging.push(rec);
        }
        Ok(seqs)
    }

    /// Upsert keyed on (key, tenant).
    pub async fn set_flag(&self, flag: FeatureFlag) {
        let mut st = self.state.lock().await;
        let pos = st
            .flags
            .iter()
            .position(|f| f.key == flag.key && f.tenant_id == flag.tenant_id);
        match pos {
            Some(i) => st.flags[i].enabled = flag.enabled,
            None => st.flags.push(flag),
        }
    }

    pub async fn seed_device(&self, device: Device) {
        self.state.lock().await.devices.insert(device.key(), device);
    }

    pub async fn device(&self, key: &DeviceKey) -> Option<Device> {
        self.state.lock().await.devices.get(key).cloned()
    }

    /// Devices of one tenant, key-ordered.
    pub async fn devices_of(&self, tenant: &TenantId) -> Vec<Device> {
        self.state
            .lock()
            .await
            .devices
            .values()
            .filter(|d| &d.tenant_id == tenant)
            .cloned()
            .collect()
    }

    pub async fn audit_for_run(&self, run_id: Uuid) -> Vec<AuditEntry> {
        let st = self.state.lock().await;
        dsr_audit::entries_for_run(&st.audit, run_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn audit_with_new_status(&self, status: EffectiveStatus) -> Vec<AuditEntry> {
        let st = self.state.lock().await;
        dsr_audit::entries_with_new_status(&st.audit, status)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn run_summary(&self, run_id: Uuid) -> Option<RunSummary> {
        let st = self.state.lock().await;
        let run = st.runs.get(&run_id)?;
        Some(RunSummary::new(run, st.verdicts_of(run_id)))
    }

    /// Full copy of the committed state.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

impl MemoryState {
    fn verdicts_of(&self, run_id: Uuid) -> Vec<TenantVerdict> {
        self.verdicts
            .values()
            .filter(|v| v.run_id == run_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl ReconcileStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn ReconcileTx>> {
        let mut guard = self.state.clone().lock_owned().await;
        let fail = guard.fail_point.take();
        if fail == Some(FailPoint::Begin) {
            bail!("injected failure at begin");
        }
        let work = guard.clone();
        Ok(Box::new(MemoryTx {
            guard: Some(guard),
            work,
            fail,
        }))
    }
}

/// Open transaction over a private copy of the state.
pub struct MemoryTx {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    work: MemoryState,
    fail: Option<FailPoint>,
}

impl MemoryTx {
    fn check(&mut self, at: FailPoint) -> Result<()> {
        if self.guard.is_none() {
            bail!("memory transaction already finished");
        }
        if self.fail == Some(at) {
            self.fail = None;
            bail!("injected failure at {:?}", at);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReconcileTx for MemoryTx {
    async fn load_run(&mut self, run_id: Uuid) -> Result<Option<FeedRun>> {
        self.check(FailPoint::LoadRun)?;
        Ok(self.work.runs.get(&run_id).cloned())
    }

    async fn load_staging(&mut self, run_id: Uuid) -> Result<Vec<StagingRecord>> {
        self.check(FailPoint::LoadStaging)?;
        let mut out: Vec<StagingRecord> = self
            .work
            .staging
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.staging_seq);
        Ok(out)
    }

    async fn lock_tenants(&mut self, tenants: &BTreeSet<TenantId>) -> Result<()> {
        self.check(FailPoint::LockTenants)?;
        // Already exclusive: the state mutex is held for the whole tx.
        debug!(tenants = tenants.len(), "memory tx holds the store lock");
        Ok(())
    }

    async fn load_tenant_verdicts(&mut self, run_id: Uuid) -> Result<Vec<TenantVerdict>> {
        self.check(FailPoint::LoadTenantVerdicts)?;
        Ok(self.work.verdicts_of(run_id))
    }

    async fn load_flags(&mut self, key: &str) -> Result<Vec<FeatureFlag>> {
        self.check(FailPoint::LoadFlags)?;
        Ok(self
            .work
            .flags
            .iter()
            .filter(|f| f.key == key)
            .cloned()
            .collect())
    }

    async fn load_devices(&mut self, tenants: &BTreeSet<TenantId>) -> Result<Vec<Device>> {
        self.check(FailPoint::LoadDevices)?;
        Ok(self
            .work
            .devices
            .values()
            .filter(|d| tenants.contains(&d.tenant_id))
            .cloned()
            .collect())
    }

    async fn insert_devices(&mut self, devices: &[Device]) -> Result<()> {
        self.check(FailPoint::InsertDevices)?;
        for d in devices {
            let key = d.key();
            if self.work.devices.contains_key(&key) {
                bail!("insert device {key}: already exists");
            }
            self.work.devices.insert(key, d.clone());
        }
        Ok(())
    }

    async fn update_devices(&mut self, devices: &[Device]) -> Result<()> {
        self.check(FailPoint::UpdateDevices)?;
        for d in devices {
            let key = d.key();
            let slot = self
                .work
                .devices
                .get_mut(&key)
                .with_context(|| format!("update device {key}: not found"))?;
            *slot = d.clone();
        }
        Ok(())
    }

    async fn append_audit(&mut self, entries: &[AuditEntry]) -> Result<()> {
        self.check(FailPoint::AppendAudit)?;
        self.work.audit.extend_from_slice(entries);
        Ok(())
    }

    async fn finish_run(&mut self, completion: &RunCompletion) -> Result<()> {
        self.check(FailPoint::FinishRun)?;
        let flips = i64::try_from(completion.unknown_flips)
            .context("unknown_flips overflows i64")?;
        let run = self
            .work
            .runs
            .get_mut(&completion.run_id)
            .with_context(|| format!("finish_run: feed run {} not found", completion.run_id))?;
        run.is_valid = Some(completion.is_valid);
        run.invalid_reason = completion.invalid_reason.clone();
        run.processed_at = Some(completion.processed_at);
        run.unknown_flip_count += flips;
        for v in &completion.tenants {
            self.work
                .verdicts
                .insert((v.run_id, v.tenant_id.clone()), v.clone());
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.check(FailPoint::Commit)?;
        if let Some(mut guard) = self.guard.take() {
            *guard = std::mem::take(&mut self.work);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.guard = None;
        self.work = MemoryState::default();
        Ok(())
    }
}
