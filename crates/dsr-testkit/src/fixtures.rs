//! Fixture builders. Fixed clock: every timestamp is an offset from [`t0`].

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use dsr_schemas::{Device, EffectiveStatus, FeedRun, StagingRecord, StatusReason, TenantId};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// `t0 + minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minutes)
}

pub fn tenant(name: &str) -> TenantId {
    TenantId::new(name)
}

pub fn run(scope: Option<&str>) -> FeedRun {
    FeedRun::new(Uuid::new_v4(), scope.map(TenantId::new), t0())
}

/// Staging row in batch "b1". `staging_seq` is assigned by the store.
pub fn staged(run: &FeedRun, tenant: &str, external_id: &str, raw: Option<&str>) -> StagingRecord {
    StagingRecord {
        staging_seq: 0,
        run_id: run.run_id,
        tenant_id: TenantId::new(tenant),
        external_id: external_id.to_string(),
        raw_status: raw.map(str::to_string),
        batch_id: Some("b1".to_string()),
        staged_at: t0(),
    }
}

/// Pre-existing, carrier-confirmed device last seen at `t0`.
pub fn device(tenant: &str, external_id: &str, status: EffectiveStatus) -> Device {
    Device {
        tenant_id: TenantId::new(tenant),
        external_id: external_id.to_string(),
        raw_carrier_status: Some(status.as_str().to_string()),
        last_seen_at: Some(t0()),
        last_seen_run_id: None,
        effective_status: status,
        previous_effective_status: None,
        status_reason: StatusReason::CarrierStatus,
        status_changed_at: Some(t0()),
        created_at: t0(),
        updated_at: t0(),
    }
}
