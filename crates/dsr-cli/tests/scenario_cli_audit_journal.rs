use assert_cmd::Command;
use chrono::Utc;
use predicates::prelude::*;
use uuid::Uuid;

use dsr_audit::AuditJournal;
use dsr_schemas::{AuditEntry, EffectiveStatus, StatusReason, TenantId};

fn entry(run_id: Uuid, ext: &str, prev: EffectiveStatus, new: EffectiveStatus) -> AuditEntry {
    AuditEntry {
        run_id,
        tenant_id: TenantId::new("t1"),
        external_id: ext.to_string(),
        previous_status: Some(prev),
        new_status: new,
        reason: if new == EffectiveStatus::Unknown {
            StatusReason::NotFoundInFeed
        } else {
            StatusReason::CarrierStatus
        },
        recorded_at: Utc::now(),
    }
}

fn write_journal(dir: &tempfile::TempDir, run_id: Uuid) -> String {
    let path = dir.path().join("audit").join("journal.jsonl");
    let mut j = AuditJournal::new(&path, true).expect("journal");
    j.record(&[
        entry(run_id, "dev-1", EffectiveStatus::Active, EffectiveStatus::Suspended),
        entry(run_id, "dev-2", EffectiveStatus::Active, EffectiveStatus::Unknown),
    ])
    .expect("record");
    path.to_string_lossy().to_string()
}

fn dsr(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dsr").expect("dsr binary");
    cmd.current_dir(dir.path());
    cmd
}

#[test]
fn verify_accepts_intact_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_journal(&dir, Uuid::new_v4());

    dsr(&dir)
        .args(["audit", "verify", "--path", &path])
        .assert()
        .success()
        .stdout(predicate::str::contains("audit_chain=valid lines=2"));
}

#[test]
fn verify_flags_tampered_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_journal(&dir, Uuid::new_v4());

    let raw = std::fs::read_to_string(&path).expect("read");
    std::fs::write(&path, raw.replace("dev-1", "dev-9")).expect("tamper");

    dsr(&dir)
        .args(["audit", "verify", "--path", &path])
        .assert()
        .failure()
        .stdout(predicate::str::contains("audit_chain=broken line=1"));
}

#[test]
fn query_filters_by_new_status_and_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run_id = Uuid::new_v4();
    let path = write_journal(&dir, run_id);

    dsr(&dir)
        .args(["audit", "query", "--path", &path, "--new-status", "unknown"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dev-2"))
        .stdout(predicate::str::contains("dev-1").not());

    let other_run = Uuid::new_v4().to_string();
    dsr(&dir)
        .args(["audit", "query", "--path", &path, "--run-id", &other_run])
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("matched=0"));
}
