//! Scenario: caller errors.
//!
//! # Invariant under test
//! An unknown run id and a tenant outside the run's scope are hard errors,
//! not retryable, and leave the store untouched (the run row included).

use dsr_reconcile::{ReconcileError, ReconciliationEngine};
use dsr_schemas::EffectiveStatus;
use dsr_testkit::fixtures::{at, device, run, staged, tenant};
use dsr_testkit::MemoryStore;
use uuid::Uuid;

#[tokio::test]
async fn unknown_run_id() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.seed_device(device("t1", "a", EffectiveStatus::Active)).await;
    let before = store.snapshot().await;

    let missing = Uuid::new_v4();
    let err = ReconciliationEngine::new(store.clone())
        .reconcile_at(missing, None, at(1))
        .await
        .expect_err("unknown run must fail");

    assert!(matches!(err, ReconcileError::RunNotFound { run_id } if run_id == missing));
    assert!(!err.is_retryable());
    assert_eq!(store.snapshot().await, before);
    Ok(())
}

#[tokio::test]
async fn tenant_outside_run_scope() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let r = run(Some("t1"));
    store.insert_run(r.clone()).await?;
    store
        .stage(vec![staged(&r, "t1", "a", Some("ACTIVE"))])
        .await?;
    let before = store.snapshot().await;

    let engine = ReconciliationEngine::new(store.clone());
    let err = engine
        .reconcile_at(r.run_id, Some(&tenant("t2")), at(1))
        .await
        .expect_err("scope mismatch must fail");
    assert!(matches!(err, ReconcileError::ScopeMismatch { .. }));
    assert!(err.to_string().contains("'t1'"));
    assert_eq!(store.snapshot().await, before);

    let summary = store.run_summary(r.run_id).await.expect("summary");
    assert_eq!(summary.processed_at, None);
    assert_eq!(summary.is_valid, None);

    // Naming the run's own tenant is fine.
    let out = engine
        .reconcile_at(r.run_id, Some(&tenant("t1")), at(2))
        .await?;
    assert_eq!(out.inserted, 1);
    Ok(())
}
