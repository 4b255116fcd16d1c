use std::collections::{BTreeMap, BTreeSet};

use dsr_schemas::{DeviceKey, StagingRecord, TenantId};

/// Collapse repeated (tenant, external_id) rows within one run.
///
/// Precedence: latest `staged_at` wins; ties go to the highest
/// `staging_seq`. Input order never matters, so two stores holding the same
/// rows in a different physical order resolve identically.
pub fn collapse_duplicates(records: &[StagingRecord]) -> BTreeMap<DeviceKey, StagingRecord> {
    let mut out: BTreeMap<DeviceKey, StagingRecord> = BTreeMap::new();
    for rec in records {
        let key = rec.key();
        match out.get(&key) {
            Some(kept) if !supersedes(rec, kept) => {}
            _ => {
                out.insert(key, rec.clone());
            }
        }
    }
    out
}

fn supersedes(candidate: &StagingRecord, kept: &StagingRecord) -> bool {
    (candidate.staged_at, candidate.staging_seq) > (kept.staged_at, kept.staging_seq)
}

/// Distinct tenants present in a staging snapshot.
pub fn tenants_in(records: &[StagingRecord]) -> BTreeSet<TenantId> {
    records.iter().map(|r| r.tenant_id.clone()).collect()
}
