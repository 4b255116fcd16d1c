//! Raw carrier status -> canonical effective status.
//!
//! Mapping is total: `None`, empty, and unrecognised tokens all land on
//! [`EffectiveStatus::Unknown`]. Ambiguity is never an error.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use dsr_schemas::EffectiveStatus;

/// Pluggable mapping seam. Implementations must be pure: identical input,
/// identical output, no hidden state.
pub trait StatusMapper: Send + Sync {
    fn map(&self, raw: Option<&str>) -> EffectiveStatus;
}

const DEFAULT_ACTIVE: &[&str] = &["ACTIVE", "ACTIVATED", "LIVE"];
const DEFAULT_SUSPENDED: &[&str] = &["SUSPENDED", "SUSPEND", "BARRED", "PAUSED"];
const DEFAULT_INACTIVE: &[&str] = &[
    "INACTIVE",
    "DEACTIVATED",
    "TERMINATED",
    "CANCELLED",
    "CANCELED",
    "RETIRED",
];

/// Token-table mapper. Tokens are stored uppercased and trimmed; lookups
/// normalise the same way, so matching is case-insensitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CarrierStatusMapper {
    table: BTreeMap<String, EffectiveStatus>,
}

impl Default for CarrierStatusMapper {
    fn default() -> Self {
        Self::from_tokens(DEFAULT_ACTIVE, DEFAULT_SUSPENDED, DEFAULT_INACTIVE)
    }
}

impl CarrierStatusMapper {
    /// Build from explicit token lists. When a token appears in more than one
    /// list the later list wins (active < suspended < inactive), so the most
    /// restrictive reading is kept.
    pub fn from_tokens<A, S, I>(active: &[A], suspended: &[S], inactive: &[I]) -> Self
    where
        A: AsRef<str>,
        S: AsRef<str>,
        I: AsRef<str>,
    {
        let mut table = BTreeMap::new();
        for t in active {
            insert_token(&mut table, t.as_ref(), EffectiveStatus::Active);
        }
        for t in suspended {
            insert_token(&mut table, t.as_ref(), EffectiveStatus::Suspended);
        }
        for t in inactive {
            insert_token(&mut table, t.as_ref(), EffectiveStatus::Inactive);
        }
        Self { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn insert_token(table: &mut BTreeMap<String, EffectiveStatus>, token: &str, status: EffectiveStatus) {
    let norm = normalize(token);
    if !norm.is_empty() {
        table.insert(norm, status);
    }
}

fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

impl StatusMapper for CarrierStatusMapper {
    fn map(&self, raw: Option<&str>) -> EffectiveStatus {
        let Some(raw) = raw else {
            return EffectiveStatus::Unknown;
        };
        self.table
            .get(&normalize(raw))
            .copied()
            .unwrap_or(EffectiveStatus::Unknown)
    }
}

/// Map with the default carrier vocabulary.
pub fn map_status(raw: Option<&str>) -> EffectiveStatus {
    static DEFAULT: OnceLock<CarrierStatusMapper> = OnceLock::new();
    DEFAULT.get_or_init(CarrierStatusMapper::default).map(raw)
}
