//! Feature flag resolution: tenant row > global row > disabled.
//!
//! The engine resolves every tenant in scope once, before planning, and hands
//! the resulting [`FlagSnapshot`] to the planner. Nothing re-reads flags
//! mid-run.

use std::collections::{BTreeMap, BTreeSet};

use dsr_schemas::{FeatureFlag, TenantId};

/// Where a resolved value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagSource {
    Tenant,
    Global,
    /// Neither row exists; resolves to disabled.
    Default,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlagResolution {
    pub enabled: bool,
    pub source: FlagSource,
}

/// What to do with devices missing from a valid run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Legacy behavior: leave the device untouched.
    LeaveUntouched,
    /// Flip to Unknown / NotFoundInFeed immediately.
    ImmediateUnknown,
}

/// Resolve one flag for one tenant.
///
/// If the store somehow holds several rows for the same (key, tenant) the
/// last one wins; the Postgres schema forbids that with a unique index.
pub fn resolve_flag(rows: &[FeatureFlag], key: &str, tenant: &TenantId) -> FlagResolution {
    let mut global: Option<bool> = None;
    let mut scoped: Option<bool> = None;

    for row in rows.iter().filter(|r| r.key == key) {
        match &row.tenant_id {
            Some(t) if t == tenant => scoped = Some(row.enabled),
            Some(_) => {}
            None => global = Some(row.enabled),
        }
    }

    match (scoped, global) {
        (Some(enabled), _) => FlagResolution {
            enabled,
            source: FlagSource::Tenant,
        },
        (None, Some(enabled)) => FlagResolution {
            enabled,
            source: FlagSource::Global,
        },
        (None, None) => FlagResolution {
            enabled: false,
            source: FlagSource::Default,
        },
    }
}

/// Per-tenant resolved flag values for one reconcile call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlagSnapshot {
    resolved: BTreeMap<TenantId, FlagResolution>,
}

impl FlagSnapshot {
    pub fn resolve(rows: &[FeatureFlag], key: &str, tenants: &BTreeSet<TenantId>) -> Self {
        let resolved = tenants
            .iter()
            .map(|t| (t.clone(), resolve_flag(rows, key, t)))
            .collect();
        Self { resolved }
    }

    /// Force a value for every tenant (tests and dry runs).
    pub fn uniform(tenants: &BTreeSet<TenantId>, enabled: bool) -> Self {
        let resolved = tenants
            .iter()
            .map(|t| {
                (
                    t.clone(),
                    FlagResolution {
                        enabled,
                        source: FlagSource::Tenant,
                    },
                )
            })
            .collect();
        Self { resolved }
    }

    pub fn get(&self, tenant: &TenantId) -> Option<FlagResolution> {
        self.resolved.get(tenant).copied()
    }

    /// Tenants that were never resolved get the default (disabled).
    pub fn policy_for(&self, tenant: &TenantId) -> MissingPolicy {
        match self.get(tenant) {
            Some(r) if r.enabled => MissingPolicy::ImmediateUnknown,
            _ => MissingPolicy::LeaveUntouched,
        }
    }

    pub fn enabled_tenants(&self) -> usize {
        self.resolved.values().filter(|r| r.enabled).count()
    }
}
