//! Scenario: run verdicts are recorded per tenant.
//!
//! # Invariants under test
//! 1. On an unscoped run, a tenant rejected by the gate gets its own invalid
//!    verdict, and the run row stays valid once another tenant was applied.
//! 2. A run none of whose tenants was ever applied is invalid, with a reason.
//! 3. `applied_at` is set by the first valid call and survives replays;
//!    per-tenant flip counts add up to the run counter.

use dsr_reconcile::ReconciliationEngine;
use dsr_schemas::{EffectiveStatus, FeatureFlag, FLAG_IMMEDIATE_UNKNOWN_ON_MISSING};
use dsr_testkit::fixtures::{at, device, run, staged, tenant};
use dsr_testkit::MemoryStore;

async fn flagged_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .set_flag(FeatureFlag::global(FLAG_IMMEDIATE_UNKNOWN_ON_MISSING, true))
        .await;
    for t in ["t1", "t2"] {
        store.seed_device(device(t, "a", EffectiveStatus::Active)).await;
        store.seed_device(device(t, "b", EffectiveStatus::Active)).await;
    }
    store
}

#[tokio::test]
async fn rejected_tenant_does_not_downgrade_applied_run() -> anyhow::Result<()> {
    let store = flagged_store().await;
    let r = run(None);
    store.insert_run(r.clone()).await?;
    store
        .stage(vec![staged(&r, "t1", "a", Some("SUSPENDED"))])
        .await?;
    let engine = ReconciliationEngine::new(store.clone());

    let applied = engine.reconcile_at(r.run_id, Some(&tenant("t1")), at(1)).await?;
    assert!(!applied.skipped);
    assert_eq!(applied.audit.len(), 2);
    assert_eq!(applied.flipped_unknown, 1);

    let rejected = engine.reconcile_at(r.run_id, Some(&tenant("t9")), at(2)).await?;
    assert!(rejected.skipped);

    let summary = store.run_summary(r.run_id).await.expect("summary");
    assert_eq!(summary.is_valid, Some(true), "t1 already wrote devices");
    assert_eq!(summary.invalid_reason, None);
    assert_eq!(summary.unknown_flip_count, 1);
    assert_eq!(summary.processed_at, Some(at(2)));

    let t1 = summary.tenant(&tenant("t1")).expect("t1 verdict");
    assert!(t1.is_valid);
    assert_eq!(t1.applied_at, Some(at(1)));
    assert_eq!(t1.unknown_flip_count, 1);

    let t9 = summary.tenant(&tenant("t9")).expect("t9 verdict");
    assert!(!t9.is_valid);
    assert_eq!(t9.invalid_reason.as_deref(), Some("no staging records for scope"));
    assert_eq!(t9.applied_at, None);
    assert_eq!(t9.unknown_flip_count, 0);

    assert_eq!(store.audit_for_run(r.run_id).await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn run_without_applied_tenant_is_invalid() -> anyhow::Result<()> {
    let store = flagged_store().await;
    let r = run(None);
    store.insert_run(r.clone()).await?;
    let a = staged(&r, "t1", "a", Some("ACTIVE"));
    let mut b = staged(&r, "t1", "b", Some("ACTIVE"));
    b.batch_id = Some("b2".to_string());
    store.stage(vec![a, b]).await?;

    let out = ReconciliationEngine::new(store.clone())
        .reconcile_at(r.run_id, None, at(1))
        .await?;
    assert!(out.skipped);

    let summary = store.run_summary(r.run_id).await.expect("summary");
    assert_eq!(summary.is_valid, Some(false));
    assert_eq!(
        summary.invalid_reason.as_deref(),
        Some("mixed refresh batches: b1,b2")
    );
    assert_eq!(summary.tenants.len(), 1);
    assert!(!summary.tenants[0].is_valid);
    assert_eq!(summary.tenants[0].applied_at, None);
    Ok(())
}

#[tokio::test]
async fn replay_keeps_first_applied_at_and_flip_totals() -> anyhow::Result<()> {
    let store = flagged_store().await;
    let r = run(None);
    store.insert_run(r.clone()).await?;
    store
        .stage(vec![
            staged(&r, "t1", "a", Some("ACTIVE")),
            staged(&r, "t2", "a", Some("ACTIVE")),
        ])
        .await?;
    let engine = ReconciliationEngine::new(store.clone());

    let first = engine.reconcile_at(r.run_id, None, at(1)).await?;
    assert_eq!(first.flipped_unknown, 2);
    let replay = engine.reconcile_at(r.run_id, None, at(2)).await?;
    assert_eq!(replay.flipped_unknown, 0);

    let summary = store.run_summary(r.run_id).await.expect("summary");
    assert_eq!(summary.unknown_flip_count, 2);
    let names: Vec<&str> = summary.tenants.iter().map(|v| v.tenant_id.as_str()).collect();
    assert_eq!(names, ["t1", "t2"]);
    for v in &summary.tenants {
        assert!(v.is_valid);
        assert_eq!(v.applied_at, Some(at(1)), "{}", v.tenant_id);
        assert_eq!(v.processed_at, at(2), "{}", v.tenant_id);
        assert_eq!(v.unknown_flip_count, 1, "{}", v.tenant_id);
    }
    let per_tenant: i64 = summary.tenants.iter().map(|v| v.unknown_flip_count).sum();
    assert_eq!(per_tenant, summary.unknown_flip_count);
    Ok(())
}
