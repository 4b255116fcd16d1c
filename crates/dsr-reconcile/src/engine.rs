use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use dsr_schemas::{
    FeedRun, StagingRecord, TenantId, TenantVerdict, FLAG_IMMEDIATE_UNKNOWN_ON_MISSING,
};

use crate::flags::FlagSnapshot;
use crate::gate::{BatchConsistencyGate, FeedValidity, FeedValidityGate};
use crate::mapper::{CarrierStatusMapper, StatusMapper};
use crate::plan::{plan_reconcile, PlanInput};
use crate::staging::{collapse_duplicates, tenants_in};
use crate::store::{ReconcileStore, ReconcileTx, RunCompletion};
use crate::types::{ReconcileError, ReconcileOutcome};

/// Orchestrates gate check, diff, status computation and audit emission for
/// one feed run as a single storage transaction.
pub struct ReconciliationEngine<S> {
    store: S,
    gate: Box<dyn FeedValidityGate>,
    mapper: Box<dyn StatusMapper>,
}

impl<S: ReconcileStore> ReconciliationEngine<S> {
    /// Engine with the reference gate and the default carrier vocabulary.
    pub fn new(store: S) -> Self {
        Self {
            store,
            gate: Box::new(BatchConsistencyGate::default()),
            mapper: Box::new(CarrierStatusMapper::default()),
        }
    }

    pub fn with_gate(mut self, gate: impl FeedValidityGate + 'static) -> Self {
        self.gate = Box::new(gate);
        self
    }

    pub fn with_mapper(mut self, mapper: impl StatusMapper + 'static) -> Self {
        self.mapper = Box::new(mapper);
        self
    }

    /// Reconcile `run_id`, optionally narrowed to one tenant.
    pub async fn reconcile(
        &self,
        run_id: Uuid,
        tenant: Option<&TenantId>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.reconcile_at(run_id, tenant, Utc::now()).await
    }

    /// Same as [`reconcile`](Self::reconcile) with an explicit clock reading.
    /// Every timestamp written by the call equals `now`.
    pub async fn reconcile_at(
        &self,
        run_id: Uuid,
        tenant: Option<&TenantId>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| ReconcileError::transaction("begin", e))?;

        match self.reconcile_in_tx(tx.as_mut(), run_id, tenant, now).await {
            Ok(outcome) => {
                tx.commit()
                    .await
                    .map_err(|e| ReconcileError::transaction("commit", e))?;
                if outcome.skipped {
                    warn!(
                        %run_id,
                        reason = ?outcome.validity.reason(),
                        "feed run invalid; devices left untouched"
                    );
                } else {
                    info!(
                        %run_id,
                        tenants = outcome.tenants.len(),
                        updated = outcome.updated,
                        inserted = outcome.inserted,
                        flipped_unknown = outcome.flipped_unknown,
                        audit_entries = outcome.audit.len(),
                        "reconcile committed"
                    );
                }
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(%run_id, error = %rb, "rollback failed; dropping transaction");
                }
                warn!(%run_id, error = %err, "reconcile rolled back");
                Err(err)
            }
        }
    }

    async fn reconcile_in_tx(
        &self,
        tx: &mut dyn ReconcileTx,
        run_id: Uuid,
        tenant: Option<&TenantId>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let run = tx
            .load_run(run_id)
            .await
            .map_err(|e| ReconcileError::transaction("load_run", e))?
            .ok_or(ReconcileError::RunNotFound { run_id })?;

        let staging = tx
            .load_staging(run_id)
            .await
            .map_err(|e| ReconcileError::transaction("load_staging", e))?;

        let tenants = resolve_scope(&run, tenant, &staging)?;

        tx.lock_tenants(&tenants)
            .await
            .map_err(|e| ReconcileError::transaction("lock_tenants", e))?;

        let prior = tx
            .load_tenant_verdicts(run_id)
            .await
            .map_err(|e| ReconcileError::transaction("load_tenant_verdicts", e))?;

        let scoped: Vec<StagingRecord> = staging
            .into_iter()
            .filter(|r| tenants.contains(&r.tenant_id))
            .collect();

        // 1) Gate. Decided before any device is read for writing.
        let validity = self.gate.evaluate(&run, &scoped);
        if let FeedValidity::Invalid(reason) = &validity {
            let reason = reason.to_string();
            tx.finish_run(&complete_run(
                run_id,
                &prior,
                &tenants,
                Some(reason.as_str()),
                &BTreeMap::new(),
                now,
            ))
            .await
            .map_err(|e| ReconcileError::transaction("finish_run", e))?;

            return Ok(ReconcileOutcome::skipped(
                run_id,
                tenants.into_iter().collect(),
                validity,
                now,
            ));
        }

        // 2) Flag, resolved once for the whole call.
        let flag_rows = tx
            .load_flags(FLAG_IMMEDIATE_UNKNOWN_ON_MISSING)
            .await
            .map_err(|e| ReconcileError::transaction("load_flags", e))?;
        let flags = FlagSnapshot::resolve(&flag_rows, FLAG_IMMEDIATE_UNKNOWN_ON_MISSING, &tenants);
        debug!(
            %run_id,
            tenants = tenants.len(),
            flag_enabled_tenants = flags.enabled_tenants(),
            "missing-device flag resolved"
        );

        // 3) Three-way diff.
        let devices = tx
            .load_devices(&tenants)
            .await
            .map_err(|e| ReconcileError::transaction("load_devices", e))?;
        let collapsed = collapse_duplicates(&scoped);
        let plan = plan_reconcile(&PlanInput {
            run_id,
            now,
            tenants: &tenants,
            devices: &devices,
            staging: &collapsed,
            flags: &flags,
            mapper: self.mapper.as_ref(),
        });
        debug!(
            %run_id,
            staged = scoped.len(),
            distinct = collapsed.len(),
            present_known = plan.partition.present_known,
            present_new = plan.partition.present_new,
            absent = plan.partition.absent,
            "partition computed"
        );

        // 4) Writes + audit, same transaction.
        tx.insert_devices(&plan.inserts)
            .await
            .map_err(|e| ReconcileError::transaction("insert_devices", e))?;
        tx.update_devices(&plan.updates)
            .await
            .map_err(|e| ReconcileError::transaction("update_devices", e))?;
        tx.append_audit(&plan.audit)
            .await
            .map_err(|e| ReconcileError::transaction("append_audit", e))?;

        // 5) Verdicts and run counters, always stamped.
        tx.finish_run(&complete_run(
            run_id,
            &prior,
            &tenants,
            None,
            &plan.flipped_by_tenant,
            now,
        ))
        .await
        .map_err(|e| ReconcileError::transaction("finish_run", e))?;

        Ok(ReconcileOutcome {
            run_id,
            tenants: tenants.into_iter().collect(),
            validity,
            updated: plan.updates.len() as u64,
            inserted: plan.inserts.len() as u64,
            flipped_unknown: plan.flipped_unknown,
            skipped: false,
            partition: plan.partition,
            audit: plan.audit,
            processed_at: now,
        })
    }
}

/// Fold this call's verdict into the stored per-tenant verdicts.
///
/// The run is valid once any of its tenants has been applied. A rejection of
/// one tenant never downgrades a run that already wrote devices for another.
fn complete_run(
    run_id: Uuid,
    prior: &[TenantVerdict],
    tenants: &BTreeSet<TenantId>,
    invalid_reason: Option<&str>,
    flips: &BTreeMap<TenantId, u64>,
    now: DateTime<Utc>,
) -> RunCompletion {
    let valid = invalid_reason.is_none();
    let earlier: BTreeMap<&TenantId, &TenantVerdict> =
        prior.iter().map(|v| (&v.tenant_id, v)).collect();

    let current: Vec<TenantVerdict> = tenants
        .iter()
        .map(|tenant| {
            let earlier = earlier.get(tenant);
            let added = flips.get(tenant).copied().unwrap_or(0);
            TenantVerdict {
                run_id,
                tenant_id: tenant.clone(),
                is_valid: valid,
                invalid_reason: invalid_reason.map(str::to_string),
                applied_at: earlier
                    .and_then(|v| v.applied_at)
                    .or(valid.then_some(now)),
                processed_at: now,
                unknown_flip_count: earlier
                    .map_or(0, |v| v.unknown_flip_count)
                    .saturating_add(i64::try_from(added).unwrap_or(i64::MAX)),
            }
        })
        .collect();

    // `applied_at` is never cleared, so the stored rows already say whether
    // any tenant was applied before this call.
    let is_valid = valid || prior.iter().any(|v| v.applied_at.is_some());
    RunCompletion {
        run_id,
        is_valid,
        invalid_reason: if is_valid {
            None
        } else {
            invalid_reason.map(str::to_string)
        },
        unknown_flips: flips.values().sum(),
        processed_at: now,
        tenants: current,
    }
}

/// Explicit tenant > run scope > every tenant present in staging.
fn resolve_scope(
    run: &FeedRun,
    requested: Option<&TenantId>,
    staging: &[StagingRecord],
) -> Result<BTreeSet<TenantId>, ReconcileError> {
    match (requested, &run.tenant_scope) {
        (Some(req), Some(scope)) if req != scope => Err(ReconcileError::ScopeMismatch {
            run_id: run.run_id,
            run_scope: scope.clone(),
            requested: req.clone(),
        }),
        (Some(req), _) => Ok(BTreeSet::from([req.clone()])),
        (None, Some(scope)) => Ok(BTreeSet::from([scope.clone()])),
        (None, None) => Ok(tenants_in(staging)),
    }
}
