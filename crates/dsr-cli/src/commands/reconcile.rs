//! `dsr reconcile` and `dsr run summary`.

use anyhow::{Context, Result};
use tracing::info;

use dsr_audit::AuditJournal;
use dsr_reconcile::{
    BatchConsistencyGate, CarrierStatusMapper, ReconcileOutcome, ReconciliationEngine,
};
use dsr_schemas::TenantId;

use super::{open_db, parse_run_id, DbContext};

pub async fn run(run_id: &str, tenant: Option<&str>, config_paths: &[String]) -> Result<()> {
    let run_uuid = parse_run_id(run_id)?;
    let DbContext {
        loaded,
        settings,
        store,
    } = open_db(config_paths).await?;
    info!(%run_uuid, config_hash = %loaded.config_hash, "starting reconcile");

    let mut engine = ReconciliationEngine::new(store).with_gate(
        BatchConsistencyGate {
            min_records: settings.gate.min_records,
            require_single_batch: settings.gate.require_single_batch,
        },
    );
    if let Some(map) = &settings.status_map {
        engine = engine.with_mapper(CarrierStatusMapper::from_tokens(
            &map.active,
            &map.suspended,
            &map.inactive,
        ));
    }

    let tenant = tenant.map(TenantId::new);
    let outcome = engine.reconcile(run_uuid, tenant.as_ref()).await?;
    print_outcome(&outcome);

    // The DB audit table is authoritative; the journal is a tamper-evident copy.
    if let Some(path) = &settings.audit.journal_path {
        if !outcome.audit.is_empty() {
            let mut journal = AuditJournal::resume(path, settings.audit.hash_chain)?;
            let records = journal.record(&outcome.audit).with_context(|| {
                format!("journal mirror failed after commit; db audit table is complete (path={path})")
            })?;
            println!("journal_path={}", path);
            println!("journal_records={}", records.len());
            if let Some(h) = journal.last_hash() {
                println!("journal_last_hash={}", h);
            }
        }
    }

    Ok(())
}

fn print_outcome(o: &ReconcileOutcome) {
    let tenants: Vec<&str> = o.tenants.iter().map(TenantId::as_str).collect();
    println!("run_id={}", o.run_id);
    println!("tenants={}", tenants.join(","));
    println!("feed_valid={}", o.validity.is_valid());
    if let Some(reason) = o.validity.reason() {
        println!("invalid_reason={}", reason);
    }
    println!("present_known={}", o.partition.present_known);
    println!("present_new={}", o.partition.present_new);
    println!("absent={}", o.partition.absent);
    println!("updated={}", o.updated);
    println!("inserted={}", o.inserted);
    println!("flipped_unknown={}", o.flipped_unknown);
    println!("audit_entries={}", o.audit.len());
    println!("processed_at={}", o.processed_at.to_rfc3339());
}

pub async fn summary(run_id: &str, config_paths: &[String]) -> Result<()> {
    let run_uuid = parse_run_id(run_id)?;
    let db = open_db(config_paths).await?;
    let s = dsr_db::fetch_run_summary(db.store.pool(), run_uuid)
        .await?
        .with_context(|| format!("feed run {run_uuid} not found"))?;

    println!("run_id={}", s.run_id);
    println!(
        "tenant_scope={}",
        s.tenant_scope.as_ref().map(TenantId::as_str).unwrap_or("")
    );
    println!(
        "is_valid={}",
        s.is_valid.map(|v| v.to_string()).unwrap_or_default()
    );
    println!("invalid_reason={}", s.invalid_reason.unwrap_or_default());
    println!(
        "processed_at={}",
        s.processed_at.map(|d| d.to_rfc3339()).unwrap_or_default()
    );
    println!("unknown_flip_count={}", s.unknown_flip_count);
    for v in &s.tenants {
        println!(
            "tenant={} is_valid={} applied_at={} unknown_flip_count={} invalid_reason={}",
            v.tenant_id,
            v.is_valid,
            v.applied_at.map(|d| d.to_rfc3339()).unwrap_or_default(),
            v.unknown_flip_count,
            v.invalid_reason.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
