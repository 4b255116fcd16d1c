//! Scenario: duplicate staging rows through the engine.
//!
//! # Invariant under test
//! When one run stages the same device more than once, the latest
//! `staged_at` wins and ties go to the later staging sequence. The device is
//! written once and audited once.

use dsr_reconcile::ReconciliationEngine;
use dsr_schemas::{DeviceKey, EffectiveStatus};
use dsr_testkit::fixtures::{at, run, staged};
use dsr_testkit::MemoryStore;

#[tokio::test]
async fn later_staged_at_beats_later_sequence() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let r = run(Some("t1"));
    store.insert_run(r.clone()).await?;

    let mut newer = staged(&r, "t1", "x", Some("INACTIVE"));
    newer.staged_at = at(5);
    let mut older = staged(&r, "t1", "x", Some("ACTIVE"));
    older.staged_at = at(1);
    // `older` gets the higher sequence but the earlier timestamp.
    store.stage(vec![newer, older]).await?;

    let out = ReconciliationEngine::new(store.clone())
        .reconcile_at(r.run_id, None, at(10))
        .await?;
    assert_eq!(out.partition.present_new, 1);
    assert_eq!(out.inserted, 1);
    assert_eq!(out.audit.len(), 1);

    let x = store.device(&DeviceKey::new("t1", "x")).await.expect("x");
    assert_eq!(x.effective_status, EffectiveStatus::Inactive);
    assert_eq!(x.raw_carrier_status.as_deref(), Some("INACTIVE"));
    Ok(())
}

#[tokio::test]
async fn equal_staged_at_goes_to_last_staged() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let r = run(Some("t1"));
    store.insert_run(r.clone()).await?;
    store
        .stage(vec![
            staged(&r, "t1", "x", Some("ACTIVE")),
            staged(&r, "t1", "x", Some("SUSPENDED")),
        ])
        .await?;

    let out = ReconciliationEngine::new(store.clone())
        .reconcile_at(r.run_id, None, at(10))
        .await?;
    assert_eq!(out.audit.len(), 1);
    assert_eq!(
        store.device(&DeviceKey::new("t1", "x")).await.map(|d| d.effective_status),
        Some(EffectiveStatus::Suspended)
    );
    Ok(())
}
