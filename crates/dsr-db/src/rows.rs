//! Row <-> record mapping shared by the pool helpers and the transactional store.

use anyhow::{Context, Result};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};

use dsr_schemas::{
    AuditEntry, Device, EffectiveStatus, FeatureFlag, FeedRun, StagingRecord, StatusReason,
    TenantId, TenantVerdict,
};

pub(crate) const DEVICE_COLUMNS: &str = "tenant_id, external_id, raw_carrier_status, \
    last_seen_at, last_seen_run_id, effective_status, previous_effective_status, \
    status_reason, status_changed_at, created_at, updated_at";

pub(crate) const AUDIT_COLUMNS: &str =
    "run_id, tenant_id, external_id, previous_status, new_status, reason, recorded_at";

pub(crate) const RUN_COLUMNS: &str = "run_id, tenant_scope, is_valid, rejected_by_ingest, \
    invalid_reason, created_at, processed_at, unknown_flip_count";

pub(crate) const VERDICT_COLUMNS: &str = "run_id, tenant_id, is_valid, invalid_reason, \
    applied_at, processed_at, unknown_flip_count";

pub(crate) const STAGING_COLUMNS: &str =
    "staging_seq, run_id, tenant_id, external_id, raw_status, batch_id, staged_at";

pub(crate) fn device_from_row(row: &PgRow) -> Result<Device> {
    let previous: Option<String> = row.try_get("previous_effective_status")?;
    Ok(Device {
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id")?),
        external_id: row.try_get("external_id")?,
        raw_carrier_status: row.try_get("raw_carrier_status")?,
        last_seen_at: row.try_get("last_seen_at")?,
        last_seen_run_id: row.try_get("last_seen_run_id")?,
        effective_status: EffectiveStatus::parse(&row.try_get::<String, _>("effective_status")?)?,
        previous_effective_status: previous.as_deref().map(EffectiveStatus::parse).transpose()?,
        status_reason: StatusReason::parse(&row.try_get::<String, _>("status_reason")?)?,
        status_changed_at: row.try_get("status_changed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn audit_from_row(row: &PgRow) -> Result<AuditEntry> {
    let previous: Option<String> = row.try_get("previous_status")?;
    Ok(AuditEntry {
        run_id: row.try_get("run_id")?,
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id")?),
        external_id: row.try_get("external_id")?,
        previous_status: previous.as_deref().map(EffectiveStatus::parse).transpose()?,
        new_status: EffectiveStatus::parse(&row.try_get::<String, _>("new_status")?)?,
        reason: StatusReason::parse(&row.try_get::<String, _>("reason")?)?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

pub(crate) fn run_from_row(row: &PgRow) -> Result<FeedRun> {
    let scope: Option<String> = row.try_get("tenant_scope")?;
    Ok(FeedRun {
        run_id: row.try_get("run_id")?,
        tenant_scope: scope.map(TenantId::new),
        is_valid: row.try_get("is_valid")?,
        rejected_by_ingest: row.try_get("rejected_by_ingest")?,
        invalid_reason: row.try_get("invalid_reason")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
        unknown_flip_count: row.try_get("unknown_flip_count")?,
    })
}

pub(crate) fn verdict_from_row(row: &PgRow) -> Result<TenantVerdict> {
    Ok(TenantVerdict {
        run_id: row.try_get("run_id")?,
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id")?),
        is_valid: row.try_get("is_valid")?,
        invalid_reason: row.try_get("invalid_reason")?,
        applied_at: row.try_get("applied_at")?,
        processed_at: row.try_get("processed_at")?,
        unknown_flip_count: row.try_get("unknown_flip_count")?,
    })
}

pub(crate) fn staging_from_row(row: &PgRow) -> Result<StagingRecord> {
    Ok(StagingRecord {
        staging_seq: row.try_get("staging_seq")?,
        run_id: row.try_get("run_id")?,
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id")?),
        external_id: row.try_get("external_id")?,
        raw_status: row.try_get("raw_status")?,
        batch_id: row.try_get("batch_id")?,
        staged_at: row.try_get("staged_at")?,
    })
}

pub(crate) fn flag_from_row(row: &PgRow) -> Result<FeatureFlag> {
    let tenant: Option<String> = row.try_get("tenant_id")?;
    Ok(FeatureFlag {
        key: row.try_get("flag_key")?,
        tenant_id: tenant.map(TenantId::new),
        enabled: row.try_get("enabled")?,
    })
}

pub(crate) fn insert_device_query(device: &Device) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        insert into devices (
          tenant_id, external_id, raw_carrier_status, last_seen_at, last_seen_run_id,
          effective_status, previous_effective_status, status_reason, status_changed_at,
          created_at, updated_at
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
        )
        "#,
    )
    .bind(device.tenant_id.as_str())
    .bind(&device.external_id)
    .bind(&device.raw_carrier_status)
    .bind(device.last_seen_at)
    .bind(device.last_seen_run_id)
    .bind(device.effective_status.as_str())
    .bind(device.previous_effective_status.map(|s| s.as_str()))
    .bind(device.status_reason.as_str())
    .bind(device.status_changed_at)
    .bind(device.created_at)
    .bind(device.updated_at)
}

pub(crate) fn update_device_query(device: &Device) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        update devices
        set raw_carrier_status = $3,
            last_seen_at = $4,
            last_seen_run_id = $5,
            effective_status = $6,
            previous_effective_status = $7,
            status_reason = $8,
            status_changed_at = $9,
            updated_at = $10
        where tenant_id = $1 and external_id = $2
        "#,
    )
    .bind(device.tenant_id.as_str())
    .bind(&device.external_id)
    .bind(&device.raw_carrier_status)
    .bind(device.last_seen_at)
    .bind(device.last_seen_run_id)
    .bind(device.effective_status.as_str())
    .bind(device.previous_effective_status.map(|s| s.as_str()))
    .bind(device.status_reason.as_str())
    .bind(device.status_changed_at)
    .bind(device.updated_at)
}

pub(crate) fn insert_audit_query(entry: &AuditEntry) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        insert into device_status_audit (
          run_id, tenant_id, external_id, previous_status, new_status, reason, recorded_at
        ) values (
          $1, $2, $3, $4, $5, $6, $7
        )
        "#,
    )
    .bind(entry.run_id)
    .bind(entry.tenant_id.as_str())
    .bind(&entry.external_id)
    .bind(entry.previous_status.map(|s| s.as_str()))
    .bind(entry.new_status.as_str())
    .bind(entry.reason.as_str())
    .bind(entry.recorded_at)
}

/// The engine owns `applied_at` and the flip total; the row takes them as given.
pub(crate) fn upsert_verdict_query(v: &TenantVerdict) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        insert into feed_run_tenant_verdicts (
          run_id, tenant_id, is_valid, invalid_reason, applied_at, processed_at,
          unknown_flip_count
        ) values (
          $1, $2, $3, $4, $5, $6, $7
        )
        on conflict (run_id, tenant_id) do update
        set is_valid = excluded.is_valid,
            invalid_reason = excluded.invalid_reason,
            applied_at = excluded.applied_at,
            processed_at = excluded.processed_at,
            unknown_flip_count = excluded.unknown_flip_count
        "#,
    )
    .bind(v.run_id)
    .bind(v.tenant_id.as_str())
    .bind(v.is_valid)
    .bind(&v.invalid_reason)
    .bind(v.applied_at)
    .bind(v.processed_at)
    .bind(v.unknown_flip_count)
}

/// Postgres bigint for a u64 counter.
pub(crate) fn to_bigint(n: u64, what: &str) -> Result<i64> {
    i64::try_from(n).with_context(|| format!("{what} overflows bigint: {n}"))
}
