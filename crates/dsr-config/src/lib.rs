//! dsr-config
//!
//! Layered YAML configuration for the reconciliation service.
//!
//! - Docs are deep-merged in order: earlier docs are base, later docs override.
//! - The merged document is canonicalized and hashed (SHA-256) so a run can
//!   record exactly which config it executed under.
//! - Literal secrets are refused. Config stores env var NAMES only.
//! - Unused keys are reported against the registry of pointers the service
//!   actually reads.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;

mod pointers;
mod secrets;
mod settings;

pub use secrets::{resolve_database_url, DatabaseUrl, DEFAULT_DATABASE_URL_ENV};
pub use settings::{AuditSettings, DbSettings, GateSettings, ReconcileSettings, StatusMapSettings};

/// Known secret-like prefixes. A leaf string starting with one of these aborts
/// the load with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",           // Stripe / OpenAI style
    "sk_live",       // Stripe live
    "sk_test",       // Stripe test
    "AKIA",          // AWS access key ID
    "-----BEGIN",    // PEM private keys
    "ghp_",          // GitHub PAT
    "glpat-",        // GitLab PAT
    "xoxb-",         // Slack bot token
    "postgres://",   // DSN with embedded credentials
    "postgresql://", // same, long scheme
];

/// JSON-pointer prefixes read by the service. A leaf under any of these is
/// consumed; anything else is reported as unused.
///
/// Keep this in step with `ReconcileSettings::from_config_json` and
/// `resolve_database_url`. Do not register sections nobody reads.
pub const CONSUMED_POINTERS: &[&str] = &[
    "/db/max_connections",
    "/db/url_env",
    "/gate/min_records",
    "/gate/require_single_batch",
    "/audit/journal_path",
    "/audit/hash_chain",
    "/status_map/active",
    "/status_map/suspended",
    "/status_map/inactive",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Normalized `CONSUMED_POINTERS`, sorted and unique.
    pub consumed_prefixes: Vec<String>,
    /// Leaves no consumed prefix covers, sorted.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Compare every leaf of the merged config against `CONSUMED_POINTERS`.
/// `Warn` always returns the report; `Fail` turns a dirty report into an error.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = CONSUMED_POINTERS
        .iter()
        .map(|p| pointers::normalize(p))
        .collect();

    let unused: BTreeSet<String> = pointers::leaves(config_json)
        .into_iter()
        .map(|(ptr, _)| ptr)
        .filter(|ptr| !consumed.iter().any(|c| pointers::covers(c, ptr)))
        .collect();

    let report = UnusedKeyReport {
        consumed_prefixes: consumed.into_iter().collect(),
        unused_leaf_pointers: unused.into_iter().collect(),
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        let shown: Vec<&str> = report
            .unused_leaf_pointers
            .iter()
            .take(12)
            .map(String::as_str)
            .collect();
        bail!(
            "CONFIG_UNUSED_KEYS: {} leaf key(s) nothing reads: {}. \
            Delete them or register the pointer in CONSUMED_POINTERS.",
            report.unused_leaf_pointers.len(),
            shown.join(", ")
        );
    }

    Ok(report)
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

/// Read each path and merge in order.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("failed to read yaml layer: {p}")))
        .collect::<Result<Vec<String>>>()?;

    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());
    for (i, raw) in yaml_docs.iter().enumerate() {
        let layer: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("invalid yaml in layer {i}"))?;
        // An empty document parses to null; it contributes nothing.
        if layer.is_null() {
            continue;
        }
        let layer = serde_json::to_value(layer).context("yaml->json conversion failed")?;
        merge_into(&mut merged, layer);
    }

    reject_secret_literals(&merged)?;

    // serde_json's default `Map` is key-ordered, so compact output is canonical.
    let canonical_json = serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));

    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Objects merge key by key; anything else in `overlay` replaces the base.
fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                merge_into(base_map.entry(k).or_insert(Value::Null), v);
            }
        }
        (slot, other) => *slot = other,
    }
}

fn reject_secret_literals(config: &Value) -> Result<()> {
    for (ptr, leaf) in pointers::leaves(config) {
        if leaf.as_str().is_some_and(looks_like_secret) {
            bail!("CONFIG_SECRET_DETECTED leaf={ptr} value=REDACTED");
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    t.len() >= 8 && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}
