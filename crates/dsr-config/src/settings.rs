//! Typed view over the merged config JSON.
//!
//! Every pointer read here must also appear in `CONSUMED_POINTERS`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbSettings {
    pub max_connections: u32,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self { max_connections: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSettings {
    pub min_records: usize,
    pub require_single_batch: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            min_records: 1,
            require_single_batch: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSettings {
    /// JSONL journal mirrored after each committed reconcile. `None` disables it.
    pub journal_path: Option<String>,
    pub hash_chain: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            journal_path: None,
            hash_chain: true,
        }
    }
}

/// Carrier vocabulary override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMapSettings {
    pub active: Vec<String>,
    pub suspended: Vec<String>,
    pub inactive: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    pub db: DbSettings,
    pub gate: GateSettings,
    pub audit: AuditSettings,
    /// `None` keeps the built-in carrier vocabulary.
    pub status_map: Option<StatusMapSettings>,
}

impl ReconcileSettings {
    /// Absent keys take their defaults. Present keys of the wrong type fail
    /// loudly with the pointer in the message.
    pub fn from_config_json(config: &Value) -> Result<Self> {
        let defaults = Self::default();

        let max_connections = match read_u64(config, "/db/max_connections")? {
            Some(0) => bail!("CONFIG_INVALID /db/max_connections: must be >= 1"),
            Some(n) => u32::try_from(n).context("CONFIG_INVALID /db/max_connections: too large")?,
            None => defaults.db.max_connections,
        };

        let min_records = match read_u64(config, "/gate/min_records")? {
            Some(n) => usize::try_from(n).context("CONFIG_INVALID /gate/min_records: too large")?,
            None => defaults.gate.min_records,
        };
        let require_single_batch = read_bool(config, "/gate/require_single_batch")?
            .unwrap_or(defaults.gate.require_single_batch);

        let journal_path = match config.pointer("/audit/journal_path") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(_) => bail!("CONFIG_INVALID /audit/journal_path: expected string"),
        };
        let hash_chain =
            read_bool(config, "/audit/hash_chain")?.unwrap_or(defaults.audit.hash_chain);

        let active = read_tokens(config, "/status_map/active")?;
        let suspended = read_tokens(config, "/status_map/suspended")?;
        let inactive = read_tokens(config, "/status_map/inactive")?;
        let status_map = if active.is_none() && suspended.is_none() && inactive.is_none() {
            None
        } else {
            Some(StatusMapSettings {
                active: active.unwrap_or_default(),
                suspended: suspended.unwrap_or_default(),
                inactive: inactive.unwrap_or_default(),
            })
        };

        Ok(Self {
            db: DbSettings { max_connections },
            gate: GateSettings {
                min_records,
                require_single_batch,
            },
            audit: AuditSettings {
                journal_path,
                hash_chain,
            },
            status_map,
        })
    }
}

fn read_u64(config: &Value, pointer: &str) -> Result<Option<u64>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) => Ok(Some(n)),
            None => bail!("CONFIG_INVALID {pointer}: expected non-negative integer, got {v}"),
        },
    }
}

fn read_bool(config: &Value, pointer: &str) -> Result<Option<bool>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(v) => bail!("CONFIG_INVALID {pointer}: expected bool, got {v}"),
    }
}

fn read_tokens(config: &Value, pointer: &str) -> Result<Option<Vec<String>>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item.as_str() {
                Some(s) => Ok(s.to_string()),
                None => bail!("CONFIG_INVALID {pointer}: tokens must be strings, got {item}"),
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(v) => bail!("CONFIG_INVALID {pointer}: expected list of strings, got {v}"),
    }
}
