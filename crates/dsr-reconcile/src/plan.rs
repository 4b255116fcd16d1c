use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use dsr_schemas::{
    AuditEntry, Device, DeviceKey, EffectiveStatus, StagingRecord, StatusReason, TenantId,
};

use crate::flags::{FlagSnapshot, MissingPolicy};
use crate::mapper::StatusMapper;
use crate::types::PartitionCounts;

/// Everything the planner needs, already loaded and resolved.
pub struct PlanInput<'a> {
    pub run_id: Uuid,
    pub now: DateTime<Utc>,
    /// Tenants in play. Devices and staging rows outside this set are ignored.
    pub tenants: &'a BTreeSet<TenantId>,
    /// Current device rows (any order).
    pub devices: &'a [Device],
    /// Staging snapshot after duplicate collapse.
    pub staging: &'a BTreeMap<DeviceKey, StagingRecord>,
    pub flags: &'a FlagSnapshot,
    pub mapper: &'a dyn StatusMapper,
}

/// Writes the engine will apply inside one transaction. All vectors are in
/// device-key order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub inserts: Vec<Device>,
    pub updates: Vec<Device>,
    pub audit: Vec<AuditEntry>,
    pub flipped_unknown: u64,
    /// `flipped_unknown` broken down by tenant. Tenants with no flip are absent.
    pub flipped_by_tenant: BTreeMap<TenantId, u64>,
    pub partition: PartitionCounts,
}

/// Three-way diff of current devices against the run's staging snapshot.
///
/// - present & known: refresh from the carrier record
/// - present & new:   insert (never gated by the flag)
/// - absent:          apply the tenant's missing policy
///
/// One audit entry per device whose effective status actually changed.
pub fn plan_reconcile(input: &PlanInput<'_>) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    let index: HashMap<DeviceKey, &Device> = input
        .devices
        .iter()
        .filter(|d| input.tenants.contains(&d.tenant_id))
        .map(|d| (d.key(), d))
        .collect();

    // Present: staging is already keyed, so iteration order is stable.
    for (key, rec) in input.staging {
        if !input.tenants.contains(&key.tenant_id) {
            continue;
        }
        let status = input.mapper.map(rec.raw_status.as_deref());

        match index.get(key) {
            Some(current) => {
                plan.partition.present_known += 1;
                if let Some(next) = refresh_present(current, rec, status, input.run_id, input.now)
                {
                    if next.effective_status != current.effective_status {
                        plan.audit.push(audit_for(
                            &next,
                            Some(current.effective_status),
                            input.run_id,
                            input.now,
                        ));
                    }
                    plan.updates.push(next);
                }
            }
            None => {
                plan.partition.present_new += 1;
                let device = new_device(rec, status, input.run_id, input.now);
                plan.audit
                    .push(audit_for(&device, None, input.run_id, input.now));
                plan.inserts.push(device);
            }
        }
    }

    // Absent: in scope, not staged. Sorted so updates/audit stay key-ordered
    // after merging with the present set below.
    let mut absent: Vec<&Device> = index
        .iter()
        .filter(|(key, _)| !input.staging.contains_key(*key))
        .map(|(_, d)| *d)
        .collect();
    absent.sort_by(|a, b| {
        (&a.tenant_id, &a.external_id).cmp(&(&b.tenant_id, &b.external_id))
    });

    for current in absent {
        plan.partition.absent += 1;
        if input.flags.policy_for(&current.tenant_id) != MissingPolicy::ImmediateUnknown {
            continue;
        }
        if let Some(next) = mark_missing(current, input.now) {
            if next.effective_status != current.effective_status {
                plan.flipped_unknown += 1;
                *plan
                    .flipped_by_tenant
                    .entry(current.tenant_id.clone())
                    .or_default() += 1;
                plan.audit.push(audit_for(
                    &next,
                    Some(current.effective_status),
                    input.run_id,
                    input.now,
                ));
            }
            plan.updates.push(next);
        }
    }

    plan.updates.sort_by(|a, b| {
        (&a.tenant_id, &a.external_id).cmp(&(&b.tenant_id, &b.external_id))
    });
    plan.audit.sort_by(|a, b| {
        (&a.tenant_id, &a.external_id).cmp(&(&b.tenant_id, &b.external_id))
    });

    plan
}

/// Present & known. Returns `None` when the row would not change.
///
/// `last_seen_at` is stamped once per run: a replay of the same run keeps the
/// first stamp, which is what makes re-running a run observably a no-op.
fn refresh_present(
    current: &Device,
    rec: &StagingRecord,
    status: EffectiveStatus,
    run_id: Uuid,
    now: DateTime<Utc>,
) -> Option<Device> {
    let stamped_by_run = current.last_seen_run_id == Some(run_id);
    if stamped_by_run
        && current.raw_carrier_status == rec.raw_status
        && current.effective_status == status
        && current.status_reason == StatusReason::CarrierStatus
    {
        return None;
    }

    let mut next = current.clone();
    next.raw_carrier_status = rec.raw_status.clone();
    if !stamped_by_run {
        next.last_seen_at = Some(now);
        next.last_seen_run_id = Some(run_id);
    }
    next.status_reason = StatusReason::CarrierStatus;
    if status != current.effective_status {
        next.previous_effective_status = Some(current.effective_status);
        next.effective_status = status;
        next.status_changed_at = Some(now);
    }
    next.updated_at = now;
    Some(next)
}

/// Present & new.
fn new_device(
    rec: &StagingRecord,
    status: EffectiveStatus,
    run_id: Uuid,
    now: DateTime<Utc>,
) -> Device {
    Device {
        tenant_id: rec.tenant_id.clone(),
        external_id: rec.external_id.clone(),
        raw_carrier_status: rec.raw_status.clone(),
        last_seen_at: Some(now),
        last_seen_run_id: Some(run_id),
        effective_status: status,
        previous_effective_status: None,
        status_reason: StatusReason::CarrierStatus,
        status_changed_at: Some(now),
        created_at: now,
        updated_at: now,
    }
}

/// Absent under `ImmediateUnknown`. `last_seen_*` is never touched here.
fn mark_missing(current: &Device, now: DateTime<Utc>) -> Option<Device> {
    if current.effective_status == EffectiveStatus::Unknown
        && current.status_reason == StatusReason::NotFoundInFeed
    {
        return None;
    }

    let mut next = current.clone();
    next.status_reason = StatusReason::NotFoundInFeed;
    if current.effective_status != EffectiveStatus::Unknown {
        next.previous_effective_status = Some(current.effective_status);
        next.effective_status = EffectiveStatus::Unknown;
        next.status_changed_at = Some(now);
    }
    next.updated_at = now;
    Some(next)
}

fn audit_for(
    device: &Device,
    previous: Option<EffectiveStatus>,
    run_id: Uuid,
    now: DateTime<Utc>,
) -> AuditEntry {
    AuditEntry {
        run_id,
        tenant_id: device.tenant_id.clone(),
        external_id: device.external_id.clone(),
        previous_status: previous,
        new_status: device.effective_status,
        reason: device.status_reason,
        recorded_at: now,
    }
}
