//! Scenario: feed validity gate.
//!
//! # Invariants under test
//! 1. A run pre-marked by ingestion is invalid regardless of staging.
//! 2. An empty scope is invalid (NoRecords).
//! 3. The record floor is enforced.
//! 4. Mixing refresh batches is invalid; evidence is sorted.
//! 5. Disabling the single-batch rule admits mixed batches.
//! 6. Re-evaluating the same inputs yields the same verdict.

use chrono::{TimeZone, Utc};
use dsr_reconcile::{BatchConsistencyGate, FeedValidity, FeedValidityGate, InvalidReason};
use dsr_schemas::{FeedRun, StagingRecord, TenantId};
use uuid::Uuid;

fn run() -> FeedRun {
    FeedRun::new(
        Uuid::new_v4(),
        None,
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
    )
}

fn rec(run: &FeedRun, seq: i64, ext: &str, batch: Option<&str>) -> StagingRecord {
    StagingRecord {
        staging_seq: seq,
        run_id: run.run_id,
        tenant_id: TenantId::new("t1"),
        external_id: ext.to_string(),
        raw_status: Some("ACTIVE".to_string()),
        batch_id: batch.map(str::to_string),
        staged_at: Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap(),
    }
}

#[test]
fn single_batch_with_records_is_valid() {
    let r = run();
    let records = vec![rec(&r, 1, "a", Some("b1")), rec(&r, 2, "b", Some("b1"))];
    let v = BatchConsistencyGate::default().evaluate(&r, &records);
    assert_eq!(v, FeedValidity::Valid);
    assert!(v.is_valid());
    assert!(v.reason().is_none());
}

#[test]
fn rejected_by_ingest_wins_over_good_staging() {
    let mut r = run();
    r.rejected_by_ingest = true;
    let records = vec![rec(&r, 1, "a", Some("b1"))];
    assert_eq!(
        BatchConsistencyGate::default().evaluate(&r, &records),
        FeedValidity::Invalid(InvalidReason::MarkedInvalid)
    );
}

#[test]
fn empty_scope_is_invalid() {
    let r = run();
    assert_eq!(
        BatchConsistencyGate::default().evaluate(&r, &[]),
        FeedValidity::Invalid(InvalidReason::NoRecords)
    );
}

#[test]
fn record_floor_is_enforced() {
    let r = run();
    let gate = BatchConsistencyGate {
        min_records: 3,
        require_single_batch: true,
    };
    let records = vec![rec(&r, 1, "a", Some("b1")), rec(&r, 2, "b", Some("b1"))];
    assert_eq!(
        gate.evaluate(&r, &records),
        FeedValidity::Invalid(InvalidReason::TooFewRecords {
            found: 2,
            required: 3
        })
    );
}

#[test]
fn zero_floor_still_requires_one_record() {
    let r = run();
    let gate = BatchConsistencyGate {
        min_records: 0,
        require_single_batch: true,
    };
    assert_eq!(
        gate.evaluate(&r, &[]),
        FeedValidity::Invalid(InvalidReason::NoRecords)
    );
    assert!(gate.evaluate(&r, &[rec(&r, 1, "a", None)]).is_valid());
}

#[test]
fn mixed_batches_are_invalid_with_sorted_evidence() {
    let r = run();
    let records = vec![
        rec(&r, 1, "a", Some("b2")),
        rec(&r, 2, "b", Some("b1")),
        rec(&r, 3, "c", None),
    ];
    let v = BatchConsistencyGate::default().evaluate(&r, &records);
    assert_eq!(
        v,
        FeedValidity::Invalid(InvalidReason::MixedBatches {
            batches: vec!["<none>".to_string(), "b1".to_string(), "b2".to_string()]
        })
    );
    assert_eq!(
        v.reason().map(ToString::to_string).as_deref(),
        Some("mixed refresh batches: <none>,b1,b2")
    );
}

#[test]
fn all_unlabelled_records_form_one_batch() {
    let r = run();
    let records = vec![rec(&r, 1, "a", None), rec(&r, 2, "b", None)];
    assert!(BatchConsistencyGate::default().evaluate(&r, &records).is_valid());
}

#[test]
fn single_batch_rule_can_be_disabled() {
    let r = run();
    let gate = BatchConsistencyGate {
        min_records: 1,
        require_single_batch: false,
    };
    let records = vec![rec(&r, 1, "a", Some("b1")), rec(&r, 2, "b", Some("b2"))];
    assert!(gate.evaluate(&r, &records).is_valid());
}

#[test]
fn verdict_is_stable_across_reevaluation() {
    let r = run();
    let records = vec![rec(&r, 1, "a", Some("b1")), rec(&r, 2, "b", Some("b2"))];
    let gate = BatchConsistencyGate::default();
    let first = gate.evaluate(&r, &records);
    for _ in 0..5 {
        assert_eq!(gate.evaluate(&r, &records), first);
    }
}
