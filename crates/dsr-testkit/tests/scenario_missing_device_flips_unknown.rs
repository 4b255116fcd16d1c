//! Scenario: missing is immediate.
//!
//! # Invariant under test
//! With `immediate-unknown-on-missing` on, a device absent from a valid feed
//! becomes Unknown / NOT_FOUND_IN_FEED in that same run. Its last-seen
//! fields keep pointing at the last run that actually reported it.

use dsr_reconcile::ReconciliationEngine;
use dsr_schemas::{
    DeviceKey, EffectiveStatus, FeatureFlag, StatusReason, FLAG_IMMEDIATE_UNKNOWN_ON_MISSING,
};
use dsr_testkit::fixtures::{at, device, run, staged, t0};
use dsr_testkit::MemoryStore;

#[tokio::test]
async fn absent_device_flips_in_the_same_run() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store
        .set_flag(FeatureFlag::global(FLAG_IMMEDIATE_UNKNOWN_ON_MISSING, true))
        .await;
    store.seed_device(device("t1", "a", EffectiveStatus::Active)).await;
    store.seed_device(device("t1", "b", EffectiveStatus::Suspended)).await;

    let r = run(Some("t1"));
    store.insert_run(r.clone()).await?;
    store
        .stage(vec![staged(&r, "t1", "a", Some("ACTIVE"))])
        .await?;

    let out = ReconciliationEngine::new(store.clone())
        .reconcile_at(r.run_id, None, at(30))
        .await?;
    assert_eq!(out.flipped_unknown, 1);

    let b = store.device(&DeviceKey::new("t1", "b")).await.expect("b");
    assert_eq!(b.effective_status, EffectiveStatus::Unknown);
    assert_eq!(b.status_reason, StatusReason::NotFoundInFeed);
    assert_eq!(b.previous_effective_status, Some(EffectiveStatus::Suspended));
    assert_eq!(b.status_changed_at, Some(at(30)));
    assert_eq!(b.last_seen_at, Some(t0()), "last_seen must not move");
    assert_eq!(b.last_seen_run_id, None);
    assert_eq!(b.raw_carrier_status.as_deref(), Some("SUSPENDED"));

    let unknown = store.audit_with_new_status(EffectiveStatus::Unknown).await;
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].external_id, "b");
    assert_eq!(unknown[0].reason, StatusReason::NotFoundInFeed);
    assert_eq!(unknown[0].previous_status, Some(EffectiveStatus::Suspended));

    let summary = store.run_summary(r.run_id).await.expect("summary");
    assert_eq!(summary.unknown_flip_count, 1);
    Ok(())
}

#[tokio::test]
async fn flip_counter_is_per_run() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store
        .set_flag(FeatureFlag::global(FLAG_IMMEDIATE_UNKNOWN_ON_MISSING, true))
        .await;
    for ext in ["a", "b", "c"] {
        store.seed_device(device("t1", ext, EffectiveStatus::Active)).await;
    }
    let engine = ReconciliationEngine::new(store.clone());

    // Run 1 drops c.
    let r1 = run(Some("t1"));
    store.insert_run(r1.clone()).await?;
    store
        .stage(vec![
            staged(&r1, "t1", "a", Some("ACTIVE")),
            staged(&r1, "t1", "b", Some("ACTIVE")),
        ])
        .await?;
    engine.reconcile_at(r1.run_id, None, at(10)).await?;

    // Run 2 drops b too; c is already Unknown and must not count again.
    let r2 = run(Some("t1"));
    store.insert_run(r2.clone()).await?;
    store
        .stage(vec![staged(&r2, "t1", "a", Some("ACTIVE"))])
        .await?;
    let out2 = engine.reconcile_at(r2.run_id, None, at(20)).await?;
    assert_eq!(out2.flipped_unknown, 1);

    assert_eq!(store.run_summary(r1.run_id).await.map(|s| s.unknown_flip_count), Some(1));
    assert_eq!(store.run_summary(r2.run_id).await.map(|s| s.unknown_flip_count), Some(1));
    assert!(store.audit_for_run(r2.run_id).await.iter().all(|e| e.external_id == "b"));
    Ok(())
}
