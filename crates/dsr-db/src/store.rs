//! Transactional store behind `ReconciliationEngine`.
//!
//! Locking: the feed run row is taken `for update`, and each tenant in scope
//! gets a transaction-scoped advisory lock, acquired in sorted order so two
//! calls over overlapping tenant sets cannot deadlock. Both are released by
//! commit or rollback.

use std::collections::BTreeSet;

use anyhow::{anyhow, bail, Context, Result};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use dsr_reconcile::{ReconcileStore, ReconcileTx, RunCompletion};
use dsr_schemas::{
    AuditEntry, Device, FeatureFlag, FeedRun, StagingRecord, TenantId, TenantVerdict,
};

use crate::rows;

/// Advisory lock namespace for per-tenant reconcile serialization.
const TENANT_LOCK_CLASS: i32 = 4242;

#[derive(Clone)]
pub struct PgReconcileStore {
    pool: PgPool,
}

impl PgReconcileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl ReconcileStore for PgReconcileStore {
    async fn begin(&self) -> Result<Box<dyn ReconcileTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("begin reconcile transaction failed")?;
        Ok(Box::new(PgReconcileTx { tx: Some(tx) }))
    }
}

/// One open reconcile transaction. Dropping it without `commit` rolls back.
pub struct PgReconcileTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgReconcileTx {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(anyhow!("reconcile transaction already finished")),
        }
    }
}

#[async_trait::async_trait]
impl ReconcileTx for PgReconcileTx {
    async fn load_run(&mut self, run_id: Uuid) -> Result<Option<FeedRun>> {
        let conn = self.conn()?;
        let row = sqlx::query(&format!(
            "select {} from feed_runs where run_id = $1 for update",
            rows::RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(conn)
        .await
        .context("load_run failed")?;

        row.as_ref().map(rows::run_from_row).transpose()
    }

    async fn load_staging(&mut self, run_id: Uuid) -> Result<Vec<StagingRecord>> {
        let conn = self.conn()?;
        let rows = sqlx::query(&format!(
            "select {} from staging_records where run_id = $1 order by staging_seq",
            rows::STAGING_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(conn)
        .await
        .context("load_staging failed")?;

        rows.iter().map(rows::staging_from_row).collect()
    }

    async fn lock_tenants(&mut self, tenants: &BTreeSet<TenantId>) -> Result<()> {
        let conn = self.conn()?;
        // BTreeSet iteration is sorted: consistent lock order across calls.
        for tenant in tenants {
            sqlx::query("select pg_advisory_xact_lock($1, hashtext($2))")
                .bind(TENANT_LOCK_CLASS)
                .bind(tenant.as_str())
                .execute(&mut *conn)
                .await
                .with_context(|| format!("advisory lock for tenant {tenant} failed"))?;
        }
        debug!(tenants = tenants.len(), "tenant locks acquired");
        Ok(())
    }

    async fn load_tenant_verdicts(&mut self, run_id: Uuid) -> Result<Vec<TenantVerdict>> {
        let conn = self.conn()?;
        let rows = sqlx::query(&format!(
            "select {} from feed_run_tenant_verdicts where run_id = $1 order by tenant_id",
            rows::VERDICT_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(conn)
        .await
        .context("load_tenant_verdicts failed")?;

        rows.iter().map(rows::verdict_from_row).collect()
    }

    async fn load_flags(&mut self, key: &str) -> Result<Vec<FeatureFlag>> {
        let conn = self.conn()?;
        let rows = sqlx::query(
            "select flag_key, tenant_id, enabled from feature_flags where flag_key = $1",
        )
        .bind(key)
        .fetch_all(conn)
        .await
        .context("load_flags failed")?;

        rows.iter().map(rows::flag_from_row).collect()
    }

    async fn load_devices(&mut self, tenants: &BTreeSet<TenantId>) -> Result<Vec<Device>> {
        let conn = self.conn()?;
        let ids: Vec<String> = tenants.iter().map(|t| t.0.clone()).collect();
        let rows = sqlx::query(&format!(
            "select {} from devices where tenant_id = any($1) order by tenant_id, external_id",
            rows::DEVICE_COLUMNS
        ))
        .bind(ids)
        .fetch_all(conn)
        .await
        .context("load_devices failed")?;

        rows.iter().map(rows::device_from_row).collect()
    }

    async fn insert_devices(&mut self, devices: &[Device]) -> Result<()> {
        let conn = self.conn()?;
        for device in devices {
            rows::insert_device_query(device)
                .execute(&mut *conn)
                .await
                .with_context(|| format!("insert device {}", device.key()))?;
        }
        Ok(())
    }

    async fn update_devices(&mut self, devices: &[Device]) -> Result<()> {
        let conn = self.conn()?;
        for device in devices {
            let done = rows::update_device_query(device)
                .execute(&mut *conn)
                .await
                .with_context(|| format!("update device {}", device.key()))?;
            if done.rows_affected() != 1 {
                bail!(
                    "update device {}: expected 1 row, got {}",
                    device.key(),
                    done.rows_affected()
                );
            }
        }
        Ok(())
    }

    async fn append_audit(&mut self, entries: &[AuditEntry]) -> Result<()> {
        let conn = self.conn()?;
        for entry in entries {
            rows::insert_audit_query(entry)
                .execute(&mut *conn)
                .await
                .with_context(|| {
                    format!("append audit {}/{}", entry.tenant_id, entry.external_id)
                })?;
        }
        Ok(())
    }

    async fn finish_run(&mut self, completion: &RunCompletion) -> Result<()> {
        let flips = rows::to_bigint(completion.unknown_flips, "unknown_flips")?;
        let conn = self.conn()?;
        let done = sqlx::query(
            r#"
            update feed_runs
            set is_valid = $2,
                invalid_reason = $3,
                processed_at = $4,
                unknown_flip_count = unknown_flip_count + $5
            where run_id = $1
            "#,
        )
        .bind(completion.run_id)
        .bind(completion.is_valid)
        .bind(&completion.invalid_reason)
        .bind(completion.processed_at)
        .bind(flips)
        .execute(&mut *conn)
        .await
        .context("finish_run failed")?;

        if done.rows_affected() != 1 {
            bail!("finish_run: feed run {} not found", completion.run_id);
        }

        for verdict in &completion.tenants {
            rows::upsert_verdict_query(verdict)
                .execute(&mut *conn)
                .await
                .with_context(|| format!("upsert verdict for tenant {}", verdict.tenant_id))?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| anyhow!("reconcile transaction already finished"))?;
        tx.commit().await.context("commit reconcile transaction failed")
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx
                .rollback()
                .await
                .context("rollback reconcile transaction failed"),
            None => Ok(()),
        }
    }
}
