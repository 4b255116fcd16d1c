//! Scenario: status mapping is total.
//!
//! Every input (None, empty, whitespace, mixed case, garbage) maps to exactly
//! one of the four effective statuses; nothing panics, nothing errors.

use dsr_reconcile::{map_status, CarrierStatusMapper, StatusMapper};
use dsr_schemas::EffectiveStatus;

#[test]
fn null_and_empty_map_to_unknown() {
    assert_eq!(map_status(None), EffectiveStatus::Unknown);
    assert_eq!(map_status(Some("")), EffectiveStatus::Unknown);
    assert_eq!(map_status(Some("   ")), EffectiveStatus::Unknown);
}

#[test]
fn mixed_case_and_padding_are_normalised() {
    assert_eq!(map_status(Some("active")), EffectiveStatus::Active);
    assert_eq!(map_status(Some("AcTiVe")), EffectiveStatus::Active);
    assert_eq!(map_status(Some("  Suspended\t")), EffectiveStatus::Suspended);
    assert_eq!(map_status(Some("deactivated")), EffectiveStatus::Inactive);
}

#[test]
fn unrecognised_token_maps_to_unknown() {
    assert_eq!(map_status(Some("XYZ123")), EffectiveStatus::Unknown);
    assert_eq!(map_status(Some("ACTIVE_PENDING")), EffectiveStatus::Unknown);
}

#[test]
fn default_mapper_agrees_with_free_function() {
    let mapper = CarrierStatusMapper::default();
    let inputs = [
        None,
        Some(""),
        Some("ACTIVE"),
        Some("live"),
        Some("barred"),
        Some("Paused"),
        Some("TERMINATED"),
        Some("canceled"),
        Some("XYZ123"),
        Some("ünïcode"),
    ];
    for raw in inputs {
        assert_eq!(
            mapper.map(raw),
            map_status(raw),
            "mapper and map_status disagree on {raw:?}"
        );
    }
}

#[test]
fn mapping_is_deterministic_across_calls() {
    let mapper = CarrierStatusMapper::default();
    for _ in 0..3 {
        assert_eq!(mapper.map(Some("suspend")), EffectiveStatus::Suspended);
        assert_eq!(mapper.map(Some("nonsense")), EffectiveStatus::Unknown);
    }
}

#[test]
fn custom_table_replaces_default_vocabulary() {
    let mapper = CarrierStatusMapper::from_tokens(&["ON"], &["HOLD"], &["OFF"]);
    assert_eq!(mapper.len(), 3);
    assert_eq!(mapper.map(Some("on")), EffectiveStatus::Active);
    assert_eq!(mapper.map(Some("Hold")), EffectiveStatus::Suspended);
    assert_eq!(mapper.map(Some("OFF")), EffectiveStatus::Inactive);
    // Default tokens are gone once a table is supplied.
    assert_eq!(mapper.map(Some("ACTIVE")), EffectiveStatus::Unknown);
}

#[test]
fn overlapping_token_keeps_most_restrictive_status() {
    let mapper = CarrierStatusMapper::from_tokens(&["X"], &["X"], &[] as &[&str]);
    assert_eq!(mapper.map(Some("x")), EffectiveStatus::Suspended);
}

#[test]
fn blank_tokens_in_table_are_ignored() {
    let mapper = CarrierStatusMapper::from_tokens(&["", "  ", "ACTIVE"], &[] as &[&str], &[] as &[&str]);
    assert_eq!(mapper.len(), 1);
    assert_eq!(mapper.map(Some("")), EffectiveStatus::Unknown);
}
