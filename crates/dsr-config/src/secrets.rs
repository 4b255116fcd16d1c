//! Runtime secret resolution.
//!
//! Config YAML stores only the NAME of the env var holding the database URL
//! (`/db/url_env`). The value is read once at startup and carried in a
//! [`DatabaseUrl`] whose `Debug` output is redacted. Errors name the env var,
//! never the value.

use anyhow::{bail, Result};
use serde_json::Value;

/// Env var read when `/db/url_env` is absent.
pub const DEFAULT_DATABASE_URL_ENV: &str = "DSR_DATABASE_URL";

/// Resolved connection string plus the env var it came from.
#[derive(Clone)]
pub struct DatabaseUrl {
    pub env_var: String,
    url: String,
}

impl DatabaseUrl {
    pub fn expose(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for DatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseUrl")
            .field("env_var", &self.env_var)
            .field("url", &"<REDACTED>")
            .finish()
    }
}

/// Read a non-empty, trimmed string at `pointer`.
fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Resolve the database URL named by `/db/url_env`
/// (default [`DEFAULT_DATABASE_URL_ENV`]).
///
/// # Errors
/// SECRETS_MISSING with the env var NAME when it is unset or blank.
pub fn resolve_database_url(config_json: &Value) -> Result<DatabaseUrl> {
    let env_var = read_str_at(config_json, "/db/url_env")
        .unwrap_or_else(|| DEFAULT_DATABASE_URL_ENV.to_string());

    match std::env::var(&env_var) {
        Ok(v) if !v.trim().is_empty() => Ok(DatabaseUrl { env_var, url: v }),
        _ => bail!(
            "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
            env_var
        ),
    }
}
