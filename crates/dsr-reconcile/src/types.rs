use chrono::{DateTime, Utc};
use uuid::Uuid;

use dsr_schemas::{AuditEntry, TenantId};

use crate::gate::FeedValidity;

/// Sizes of the three disjoint sets computed for one call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartitionCounts {
    /// Key in both current devices and staging.
    pub present_known: u64,
    /// Key only in staging.
    pub present_new: u64,
    /// Key only in current devices (scoped to the tenants in play).
    pub absent: u64,
}

/// What one reconcile call did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub run_id: Uuid,
    /// Tenants the call covered, sorted.
    pub tenants: Vec<TenantId>,
    pub validity: FeedValidity,
    /// Existing devices whose row was written.
    pub updated: u64,
    pub inserted: u64,
    /// Devices moved to Unknown because they were missing from the feed.
    pub flipped_unknown: u64,
    /// True when the gate rejected the run; nothing but the run row changed.
    pub skipped: bool,
    pub partition: PartitionCounts,
    /// Entries appended in the same transaction as the device writes.
    pub audit: Vec<AuditEntry>,
    pub processed_at: DateTime<Utc>,
}

impl ReconcileOutcome {
    pub fn skipped(
        run_id: Uuid,
        tenants: Vec<TenantId>,
        validity: FeedValidity,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            tenants,
            validity,
            updated: 0,
            inserted: 0,
            flipped_unknown: 0,
            skipped: true,
            partition: PartitionCounts::default(),
            audit: Vec::new(),
            processed_at,
        }
    }

    /// True when the call changed no device.
    pub fn is_noop(&self) -> bool {
        self.updated == 0 && self.inserted == 0
    }
}

/// Hard failures of a reconcile call. Feed invalidity, unmapped carrier
/// statuses and missing flags are NOT errors; they resolve to typed outcomes.
#[derive(Debug)]
pub enum ReconcileError {
    /// The run id is not known to the store.
    RunNotFound { run_id: Uuid },
    /// Caller asked for a tenant the run does not cover.
    ScopeMismatch {
        run_id: Uuid,
        run_scope: TenantId,
        requested: TenantId,
    },
    /// Storage failure. The transaction was rolled back; retrying the whole
    /// call is safe.
    TransactionFailure {
        stage: &'static str,
        source: anyhow::Error,
    },
}

impl ReconcileError {
    pub fn transaction(stage: &'static str, source: anyhow::Error) -> Self {
        Self::TransactionFailure { stage, source }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionFailure { .. })
    }
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunNotFound { run_id } => write!(f, "feed run {run_id} not found"),
            Self::ScopeMismatch {
                run_id,
                run_scope,
                requested,
            } => write!(
                f,
                "feed run {run_id} is scoped to tenant '{run_scope}', cannot reconcile tenant '{requested}'"
            ),
            Self::TransactionFailure { stage, source } => {
                write!(f, "reconcile transaction failed at {stage}: {source:#}")
            }
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TransactionFailure { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
