//! dsr-schemas
//!
//! Shared record shapes for device status reconciliation. Every crate in the
//! workspace speaks these types; none of them carry behavior beyond parsing
//! and rendering the persisted vocabulary.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Feature flag consulted by the engine for absent devices.
pub const FLAG_IMMEDIATE_UNKNOWN_ON_MISSING: &str = "immediate-unknown-on-missing";

/// Tenant identity (stable opaque string).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique device key: (tenant_id, external_id).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub tenant_id: TenantId,
    pub external_id: String,
}

impl DeviceKey {
    pub fn new(tenant_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            tenant_id: TenantId::new(tenant_id),
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.external_id)
    }
}

/// Canonical device state exposed to downstream consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveStatus {
    Active,
    Suspended,
    Inactive,
    Unknown,
}

impl EffectiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveStatus::Active => "ACTIVE",
            EffectiveStatus::Suspended => "SUSPENDED",
            EffectiveStatus::Inactive => "INACTIVE",
            EffectiveStatus::Unknown => "UNKNOWN",
        }
    }

    /// Parse the persisted form. This is a storage decode, not the carrier
    /// mapping: an unexpected value here means the row itself is corrupt.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(EffectiveStatus::Active),
            "SUSPENDED" => Ok(EffectiveStatus::Suspended),
            "INACTIVE" => Ok(EffectiveStatus::Inactive),
            "UNKNOWN" => Ok(EffectiveStatus::Unknown),
            other => Err(anyhow!("invalid effective status: {}", other)),
        }
    }
}

impl fmt::Display for EffectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a device holds its current effective status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusReason {
    /// Carrier-confirmed: the device was present in a valid feed.
    CarrierStatus,
    /// Inferred: the device was absent from a valid feed.
    NotFoundInFeed,
    /// Written by upstream tooling for rows quarantined on a bad feed. The
    /// engine reads it but never produces it.
    FeedInvalid,
}

impl StatusReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusReason::CarrierStatus => "CARRIER_STATUS",
            StatusReason::NotFoundInFeed => "NOT_FOUND_IN_FEED",
            StatusReason::FeedInvalid => "FEED_INVALID",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "CARRIER_STATUS" => Ok(StatusReason::CarrierStatus),
            "NOT_FOUND_IN_FEED" => Ok(StatusReason::NotFoundInFeed),
            "FEED_INVALID" => Ok(StatusReason::FeedInvalid),
            other => Err(anyhow!("invalid status reason: {}", other)),
        }
    }
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked device row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub tenant_id: TenantId,
    pub external_id: String,
    pub raw_carrier_status: Option<String>,
    /// Last time the device appeared in a valid run. `None` only for rows
    /// seeded outside the engine that were never seen in a feed.
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_seen_run_id: Option<Uuid>,
    pub effective_status: EffectiveStatus,
    pub previous_effective_status: Option<EffectiveStatus>,
    pub status_reason: StatusReason,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            tenant_id: self.tenant_id.clone(),
            external_id: self.external_id.clone(),
        }
    }
}

/// One execution of external data ingestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRun {
    pub run_id: Uuid,
    /// `None` = the run covers every tenant present in its staging.
    pub tenant_scope: Option<TenantId>,
    /// Run-level verdict. Once any tenant has been applied it stays true; see
    /// [`TenantVerdict`] for the per-tenant view.
    pub is_valid: Option<bool>,
    /// Pre-mark written by the ingestion side when it already knows the
    /// feed is unusable. The engine reads it and never writes it.
    pub rejected_by_ingest: bool,
    pub invalid_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub unknown_flip_count: i64,
}

impl FeedRun {
    pub fn new(run_id: Uuid, tenant_scope: Option<TenantId>, created_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            tenant_scope,
            is_valid: None,
            rejected_by_ingest: false,
            invalid_reason: None,
            created_at,
            processed_at: None,
            unknown_flip_count: 0,
        }
    }
}

/// Externally reported record staged for one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingRecord {
    /// Storage-assigned, strictly increasing within a store.
    pub staging_seq: i64,
    pub run_id: Uuid,
    pub tenant_id: TenantId,
    pub external_id: String,
    pub raw_status: Option<String>,
    /// Refresh batch label written by the ingestion side.
    pub batch_id: Option<String>,
    pub staged_at: DateTime<Utc>,
}

impl StagingRecord {
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            tenant_id: self.tenant_id.clone(),
            external_id: self.external_id.clone(),
        }
    }
}

/// Append-only record of one effective-status transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub run_id: Uuid,
    pub tenant_id: TenantId,
    pub external_id: String,
    /// `None` when the run inserted the device.
    pub previous_status: Option<EffectiveStatus>,
    pub new_status: EffectiveStatus,
    pub reason: StatusReason,
    pub recorded_at: DateTime<Utc>,
}

/// Feature flag row. `tenant_id = None` is the global row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub key: String,
    pub tenant_id: Option<TenantId>,
    pub enabled: bool,
}

impl FeatureFlag {
    pub fn global(key: impl Into<String>, enabled: bool) -> Self {
        Self {
            key: key.into(),
            tenant_id: None,
            enabled,
        }
    }

    pub fn for_tenant(key: impl Into<String>, tenant: TenantId, enabled: bool) -> Self {
        Self {
            key: key.into(),
            tenant_id: Some(tenant),
            enabled,
        }
    }
}

/// Gate verdict for one tenant of one feed run.
///
/// `is_valid`/`invalid_reason` are from the latest call that covered the
/// tenant. `applied_at` is set by the first valid call and never cleared, so a
/// later rejection cannot hide that devices were already written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantVerdict {
    pub run_id: Uuid,
    pub tenant_id: TenantId,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
    pub unknown_flip_count: i64,
}

/// Run-level counters exposed to KPI/alerting collaborators.
///
/// On a run without a tenant scope, `is_valid` is true once any tenant was
/// applied; `tenants` carries the per-tenant breakdown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub tenant_scope: Option<TenantId>,
    pub is_valid: Option<bool>,
    pub invalid_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub unknown_flip_count: i64,
    /// Tenant-ordered.
    pub tenants: Vec<TenantVerdict>,
}

impl RunSummary {
    pub fn new(run: &FeedRun, mut tenants: Vec<TenantVerdict>) -> Self {
        tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        Self {
            run_id: run.run_id,
            tenant_scope: run.tenant_scope.clone(),
            is_valid: run.is_valid,
            invalid_reason: run.invalid_reason.clone(),
            processed_at: run.processed_at,
            unknown_flip_count: run.unknown_flip_count,
            tenants,
        }
    }

    pub fn tenant(&self, tenant: &TenantId) -> Option<&TenantVerdict> {
        self.tenants.iter().find(|v| &v.tenant_id == tenant)
    }
}
