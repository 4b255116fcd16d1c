//! `dsr audit verify` and `dsr audit query`. Offline: no DB needed.

use anyhow::{bail, Context, Result};

use dsr_audit::VerifyResult;
use dsr_schemas::{AuditEntry, EffectiveStatus};

use super::parse_run_id;

pub fn verify(path: &str) -> Result<()> {
    match dsr_audit::verify_hash_chain(path)? {
        VerifyResult::Valid { lines } => {
            println!("audit_chain=valid lines={}", lines);
            Ok(())
        }
        VerifyResult::Broken { line, reason } => {
            println!("audit_chain=broken line={} reason={}", line, reason);
            bail!("AUDIT_CHAIN_BROKEN path={} line={}", path, line)
        }
    }
}

pub fn query(path: &str, run_id: Option<&str>, new_status: Option<&str>) -> Result<()> {
    let run_id = run_id.map(parse_run_id).transpose()?;
    let new_status = new_status
        .map(|s| EffectiveStatus::parse(s.trim().to_ascii_uppercase().as_str()))
        .transpose()
        .context("invalid --new-status")?;

    let records = dsr_audit::read_journal(path)?;
    let mut entries: Vec<&AuditEntry> = records.iter().map(|r| &r.entry).collect();
    if let Some(id) = run_id {
        entries = dsr_audit::entries_for_run(entries, id);
    }
    if let Some(status) = new_status {
        entries = dsr_audit::entries_with_new_status(entries, status);
    }

    for e in &entries {
        println!("{}", serde_json::to_string(e).context("serialize audit entry")?);
    }
    eprintln!("matched={}", entries.len());
    Ok(())
}
