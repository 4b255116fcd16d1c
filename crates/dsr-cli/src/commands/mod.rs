//! Command handler modules for dsr-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod audit;
pub mod reconcile;

use anyhow::{Context, Result};
use dsr_config::{LoadedConfig, ReconcileSettings, UnusedKeyPolicy};
use dsr_db::PgReconcileStore;
use tracing::{info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub fn parse_run_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).context("invalid run_id uuid")
}

/// Load layered YAML and run the unused-key report under `policy`.
pub fn load_config(paths: &[String], policy: UnusedKeyPolicy) -> Result<LoadedConfig> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = dsr_config::load_layered_yaml(&path_refs)?;

    let report = dsr_config::report_unused_keys(&loaded.config_json, policy)?;
    if !report.is_clean() {
        warn!(
            unused = ?report.unused_leaf_pointers,
            "config contains keys that nothing reads"
        );
    }
    Ok(loaded)
}

/// Everything a DB-backed command needs, resolved from one layered config.
pub struct DbContext {
    pub loaded: LoadedConfig,
    pub settings: ReconcileSettings,
    pub store: PgReconcileStore,
}

/// Connect to the database named by `/db/url_env`. Every command that talks
/// to Postgres goes through here, so they all agree on the target.
pub async fn open_db(config_paths: &[String]) -> Result<DbContext> {
    let loaded = load_config(config_paths, UnusedKeyPolicy::Warn)?;
    let settings = ReconcileSettings::from_config_json(&loaded.config_json)?;
    let db_url = dsr_config::resolve_database_url(&loaded.config_json)?;

    info!(
        config_hash = %loaded.config_hash,
        db_url_env = %db_url.env_var,
        "connecting to database"
    );
    let pool = dsr_db::connect_with(db_url.expose(), settings.db.max_connections).await?;

    Ok(DbContext {
        loaded,
        settings,
        store: PgReconcileStore::new(pool),
    })
}

pub fn config_hash(paths: &[String], strict: bool) -> Result<()> {
    let policy = if strict {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let loaded = load_config(paths, policy)?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}
