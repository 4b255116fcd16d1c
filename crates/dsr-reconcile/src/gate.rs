//! Feed validity gate.
//!
//! Decides whether a run's staging snapshot is complete enough to trust.
//! An invalid verdict is a designed outcome, not an error: the engine skips
//! the run and leaves every device untouched.
//!
//! All evaluation is pure and deterministic. The same persisted run and the same
//! staging rows always produce the same verdict.

use std::collections::BTreeSet;
use std::fmt;

use dsr_schemas::{FeedRun, StagingRecord};

/// Label used for records that carry no batch id.
const NO_BATCH: &str = "<none>";

/// Why a run was judged untrustworthy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvalidReason {
    /// The ingestion side already rejected the run.
    MarkedInvalid,
    /// No staging records for the scope in question.
    NoRecords,
    /// Fewer records than the configured floor.
    TooFewRecords { found: usize, required: usize },
    /// Records from more than one refresh batch were mixed into one run.
    MixedBatches { batches: Vec<String> },
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkedInvalid => write!(f, "run rejected by ingestion"),
            Self::NoRecords => write!(f, "no staging records for scope"),
            Self::TooFewRecords { found, required } => {
                write!(f, "too few staging records: found={found} required={required}")
            }
            Self::MixedBatches { batches } => {
                write!(f, "mixed refresh batches: {}", batches.join(","))
            }
        }
    }
}

/// Gate verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedValidity {
    Valid,
    Invalid(InvalidReason),
}

impl FeedValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, FeedValidity::Valid)
    }

    pub fn reason(&self) -> Option<&InvalidReason> {
        match self {
            FeedValidity::Valid => None,
            FeedValidity::Invalid(r) => Some(r),
        }
    }
}

/// Pluggable validity policy.
///
/// `records` is the staging snapshot already narrowed to the tenants the
/// caller is reconciling; duplicates have NOT been collapsed yet.
pub trait FeedValidityGate: Send + Sync {
    fn evaluate(&self, run: &FeedRun, records: &[StagingRecord]) -> FeedValidity;
}

/// Reference heuristic: enough records, and all from one refresh batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConsistencyGate {
    /// Minimum record count for the scope. Values below 1 are treated as 1.
    pub min_records: usize,
    /// Reject runs whose records span more than one `batch_id`.
    pub require_single_batch: bool,
}

impl Default for BatchConsistencyGate {
    fn default() -> Self {
        Self {
            min_records: 1,
            require_single_batch: true,
        }
    }
}

impl FeedValidityGate for BatchConsistencyGate {
    fn evaluate(&self, run: &FeedRun, records: &[StagingRecord]) -> FeedValidity {
        if run.rejected_by_ingest {
            return FeedValidity::Invalid(InvalidReason::MarkedInvalid);
        }

        if records.is_empty() {
            return FeedValidity::Invalid(InvalidReason::NoRecords);
        }

        let required = self.min_records.max(1);
        if records.len() < required {
            return FeedValidity::Invalid(InvalidReason::TooFewRecords {
                found: records.len(),
                required,
            });
        }

        if self.require_single_batch {
            // BTreeSet keeps the evidence in stable order for logs and the run row.
            let batches: BTreeSet<&str> = records
                .iter()
                .map(|r| r.batch_id.as_deref().unwrap_or(NO_BATCH))
                .collect();
            if batches.len() > 1 {
                return FeedValidity::Invalid(InvalidReason::MixedBatches {
                    batches: batches.into_iter().map(str::to_string).collect(),
                });
            }
        }

        FeedValidity::Valid
    }
}
