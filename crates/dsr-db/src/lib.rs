//! dsr-db
//!
//! Postgres persistence for device status reconciliation.
//!
//! - `PgReconcileStore` backs the engine; one engine call == one transaction.
//! - The free functions below are for collaborators (ingestion, reporting,
//!   CLI) and tests. None of them run inside the engine's transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use dsr_schemas::{
    AuditEntry, Device, DeviceKey, EffectiveStatus, FeatureFlag, FeedRun, RunSummary, TenantId,
};

mod rows;
mod store;

pub use store::{PgReconcileStore, PgReconcileTx};

/// Env var the DB scenario tests read. Binaries resolve theirs from config.
pub const ENV_DB_URL: &str = "DSR_DATABASE_URL";

pub async fn connect_with(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_devices_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'devices'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_devices_table: exists,
    })
}

/// Register a feed run. Ingestion calls this before staging records.
pub async fn insert_feed_run(pool: &PgPool, run: &FeedRun) -> Result<()> {
    sqlx::query(
        r#"
        insert into feed_runs (
          run_id, tenant_scope, is_valid, rejected_by_ingest, invalid_reason,
          created_at, processed_at, unknown_flip_count
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8
        )
        "#,
    )
    .bind(run.run_id)
    .bind(run.tenant_scope.as_ref().map(TenantId::as_str))
    .bind(run.is_valid)
    .bind(run.rejected_by_ingest)
    .bind(&run.invalid_reason)
    .bind(run.created_at)
    .bind(run.processed_at)
    .bind(run.unknown_flip_count)
    .execute(pool)
    .await
    .context("insert_feed_run failed")?;

    Ok(())
}

/// Staging row as written by ingestion. The store assigns `staging_seq`.
#[derive(Debug, Clone)]
pub struct NewStagingRecord {
    pub run_id: Uuid,
    pub tenant_id: TenantId,
    pub external_id: String,
    pub raw_status: Option<String>,
    pub batch_id: Option<String>,
    pub staged_at: DateTime<Utc>,
}

/// Stage records in order. Returns the assigned sequence numbers.
pub async fn insert_staging_records(
    pool: &PgPool,
    records: &[NewStagingRecord],
) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await.context("begin staging insert failed")?;
    let mut seqs = Vec::with_capacity(records.len());

    for rec in records {
        let row = sqlx::query(
            r#"
            insert into staging_records (
              run_id, tenant_id, external_id, raw_status, batch_id, staged_at
            ) values (
              $1, $2, $3, $4, $5, $6
            )
            returning staging_seq
            "#,
        )
        .bind(rec.run_id)
        .bind(rec.tenant_id.as_str())
        .bind(&rec.external_id)
        .bind(&rec.raw_status)
        .bind(&rec.batch_id)
        .bind(rec.staged_at)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("insert staging record {}/{}", rec.tenant_id, rec.external_id))?;
        seqs.push(row.try_get::<i64, _>("staging_seq")?);
    }

    tx.commit().await.context("commit staging insert failed")?;
    Ok(seqs)
}

/// Upsert one flag row (global when `tenant_id` is None).
pub async fn set_feature_flag(pool: &PgPool, flag: &FeatureFlag) -> Result<()> {
    sqlx::query(
        r#"
        insert into feature_flags (flag_key, tenant_id, enabled, updated_at)
        values ($1, $2, $3, now())
        on conflict (flag_key, (coalesce(tenant_id, '')))
        do update set enabled = excluded.enabled, updated_at = now()
        "#,
    )
    .bind(&flag.key)
    .bind(flag.tenant_id.as_ref().map(TenantId::as_str))
    .bind(flag.enabled)
    .execute(pool)
    .await
    .context("set_feature_flag failed")?;
    Ok(())
}

/// Write a device row directly. For seeding pre-existing inventory; the
/// engine never goes through here.
pub async fn insert_device(pool: &PgPool, device: &Device) -> Result<()> {
    rows::insert_device_query(device)
        .execute(pool)
        .await
        .with_context(|| format!("insert_device {}", device.key()))?;
    Ok(())
}

pub async fn fetch_device(pool: &PgPool, key: &DeviceKey) -> Result<Option<Device>> {
    let row = sqlx::query(&format!(
        "select {} from devices where tenant_id = $1 and external_id = $2",
        rows::DEVICE_COLUMNS
    ))
    .bind(key.tenant_id.as_str())
    .bind(&key.external_id)
    .fetch_optional(pool)
    .await
    .context("fetch_device failed")?;

    row.as_ref().map(rows::device_from_row).transpose()
}

/// Audit entries written by one run, in append order.
pub async fn audit_entries_for_run(pool: &PgPool, run_id: Uuid) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(&format!(
        "select {} from device_status_audit where run_id = $1 order by audit_id",
        rows::AUDIT_COLUMNS
    ))
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("audit_entries_for_run failed")?;

    rows.iter().map(rows::audit_from_row).collect()
}

/// Audit entries that landed on `status`, in append order.
pub async fn audit_entries_with_new_status(
    pool: &PgPool,
    status: EffectiveStatus,
) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(&format!(
        "select {} from device_status_audit where new_status = $1 order by audit_id",
        rows::AUDIT_COLUMNS
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await
    .context("audit_entries_with_new_status failed")?;

    rows.iter().map(rows::audit_from_row).collect()
}

/// Run row plus its per-tenant verdicts. RunSummaryReporter reads this.
pub async fn fetch_run_summary(pool: &PgPool, run_id: Uuid) -> Result<Option<RunSummary>> {
    let row = sqlx::query(&format!(
        "select {} from feed_runs where run_id = $1",
        rows::RUN_COLUMNS
    ))
    .bind(run_id)
    .fetch_optional(pool)
    .await
    .context("fetch_run_summary failed")?;

    let Some(row) = row else {
        return Ok(None);
    };
    let run = rows::run_from_row(&row)?;

    let verdicts = sqlx::query(&format!(
        "select {} from feed_run_tenant_verdicts where run_id = $1 order by tenant_id",
        rows::VERDICT_COLUMNS
    ))
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("fetch_run_summary verdicts failed")?
    .iter()
    .map(rows::verdict_from_row)
    .collect::<Result<Vec<_>>>()?;

    Ok(Some(RunSummary::new(&run, verdicts)))
}
