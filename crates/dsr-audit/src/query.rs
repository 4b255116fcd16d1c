use uuid::Uuid;

use dsr_schemas::{AuditEntry, EffectiveStatus};

/// Entries written by `run_id`, in input order.
pub fn entries_for_run<'a, I>(entries: I, run_id: Uuid) -> Vec<&'a AuditEntry>
where
    I: IntoIterator<Item = &'a AuditEntry>,
{
    entries.into_iter().filter(|e| e.run_id == run_id).collect()
}

/// Entries whose transition landed on `status`, in input order.
pub fn entries_with_new_status<'a, I>(entries: I, status: EffectiveStatus) -> Vec<&'a AuditEntry>
where
    I: IntoIterator<Item = &'a AuditEntry>,
{
    entries
        .into_iter()
        .filter(|e| e.new_status == status)
        .collect()
}
