//! Scenario: configured gate and vocabulary.
//!
//! The engine takes its gate and mapper from settings at startup. These
//! checks run the engine with non-default policies end to end.

use dsr_reconcile::{
    BatchConsistencyGate, CarrierStatusMapper, FeedValidity, InvalidReason, ReconciliationEngine,
};
use dsr_schemas::{DeviceKey, EffectiveStatus};
use dsr_testkit::fixtures::{at, run, staged};
use dsr_testkit::MemoryStore;

#[tokio::test]
async fn record_floor_rejects_thin_feed() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let r = run(Some("t1"));
    store.insert_run(r.clone()).await?;
    store
        .stage(vec![
            staged(&r, "t1", "a", Some("ACTIVE")),
            staged(&r, "t1", "b", Some("ACTIVE")),
        ])
        .await?;

    let out = ReconciliationEngine::new(store.clone())
        .with_gate(BatchConsistencyGate {
            min_records: 3,
            require_single_batch: true,
        })
        .reconcile_at(r.run_id, None, at(1))
        .await?;

    assert_eq!(
        out.validity,
        FeedValidity::Invalid(InvalidReason::TooFewRecords {
            found: 2,
            required: 3
        })
    );
    assert!(store.snapshot().await.devices.is_empty());
    Ok(())
}

#[tokio::test]
async fn mixed_batches_allowed_when_configured() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let r = run(Some("t1"));
    store.insert_run(r.clone()).await?;
    let a = staged(&r, "t1", "a", Some("ACTIVE"));
    let mut b = staged(&r, "t1", "b", Some("ACTIVE"));
    b.batch_id = None;
    store.stage(vec![a, b]).await?;

    let out = ReconciliationEngine::new(store.clone())
        .with_gate(BatchConsistencyGate {
            min_records: 1,
            require_single_batch: false,
        })
        .reconcile_at(r.run_id, None, at(1))
        .await?;

    assert!(out.validity.is_valid());
    assert_eq!(out.inserted, 2);
    Ok(())
}

#[tokio::test]
async fn custom_vocabulary_replaces_defaults() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let r = run(Some("t1"));
    store.insert_run(r.clone()).await?;
    store
        .stage(vec![
            staged(&r, "t1", "on", Some(" on ")),
            staged(&r, "t1", "hold", Some("HOLD")),
            staged(&r, "t1", "legacy", Some("ACTIVE")),
        ])
        .await?;

    ReconciliationEngine::new(store.clone())
        .with_mapper(CarrierStatusMapper::from_tokens(&["ON"], &["HOLD"], &["OFF"]))
        .reconcile_at(r.run_id, None, at(1))
        .await?;

    let status = |x: &str| DeviceKey::new("t1", x);
    assert_eq!(
        store.device(&status("on")).await.map(|d| d.effective_status),
        Some(EffectiveStatus::Active)
    );
    assert_eq!(
        store.device(&status("hold")).await.map(|d| d.effective_status),
        Some(EffectiveStatus::Suspended)
    );
    assert_eq!(
        store.device(&status("legacy")).await.map(|d| d.effective_status),
        Some(EffectiveStatus::Unknown)
    );
    Ok(())
}
