use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    /// Process-local tables, lost on exit. For local runs and demos.
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub store: StoreKind,
    pub max_connections: u32,
    pub log_format: LogFormat,
    pub prune: PruneConfig,
}

/// Periodic pruning settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PruneConfig {
    /// Set via AUTHZ_PRUNE_ENABLED. Default: true.
    pub enabled: bool,
    /// Seconds between runs. Set via AUTHZ_PRUNE_INTERVAL_SECS. Default: 3600.
    pub interval_secs: u64,
    /// Only authorizations older than this many days are considered.
    /// Set via AUTHZ_PRUNE_MIN_AGE_DAYS. Default: 14.
    pub min_age_days: u32,
}

impl PruneConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn min_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.min_age_days))
    }
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            min_age_days: 14,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Builds the config from an arbitrary key lookup. `load` passes the process environment.
pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let store = match lookup("AUTHZ_STORE").as_deref().map(str::trim) {
        None | Some("") | Some("postgres") => StoreKind::Postgres,
        Some("memory") => StoreKind::Memory,
        Some(other) => anyhow::bail!(
            "AUTHZ_STORE must be 'postgres' or 'memory', got '{}'",
            other
        ),
    };

    let log_format = match lookup("AUTHZ_LOG_FORMAT").as_deref() {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Text,
    };

    let defaults = PruneConfig::default();
    let prune = PruneConfig {
        enabled: lookup("AUTHZ_PRUNE_ENABLED")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off"))
            .unwrap_or(defaults.enabled),
        interval_secs: lookup("AUTHZ_PRUNE_INTERVAL_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.interval_secs),
        min_age_days: lookup("AUTHZ_PRUNE_MIN_AGE_DAYS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.min_age_days),
    };

    Ok(Config {
        database_url: lookup("DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost/authz".into()),
        store,
        max_connections: lookup("AUTHZ_DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        log_format,
        prune,
    })
}
