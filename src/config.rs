use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Settings for the dispatch layer.
///
/// `Default` gives the production values; `from_env` overrides them from
/// environment variables.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Redis connection URL used by `RedisStore`.
    pub redis_url: String,
    /// Namespace prefix for every key in the shared store.
    pub key_prefix: String,
    /// Required prefix of upstream credentials.
    pub credential_prefix: String,
    /// How long a credential stays out of rotation after failing.
    pub credential_penalty: Duration,
    /// Wait before retrying a retryable upstream failure.
    pub retry_backoff: Duration,
    /// Registration reachability probe timeout.
    pub probe_timeout: Duration,
    /// Per-delivery timeout for redirect targets.
    pub delivery_timeout: Duration,
    /// Max failed-delivery records kept per target.
    pub failed_queue_capacity: usize,
    /// Max audit log entries kept.
    pub audit_log_capacity: usize,
    /// Age after which audit log entries expire.
    pub audit_log_retention: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6380/0".to_string(),
            key_prefix: "transcrevezap".to_string(),
            credential_prefix: "gsk_".to_string(),
            credential_penalty: Duration::from_secs(300),
            retry_backoff: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(10),
            delivery_timeout: Duration::from_secs(10),
            failed_queue_capacity: 100,
            audit_log_capacity: 1_000,
            audit_log_retention: Duration::from_secs(48 * 3600),
        }
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional:
    /// - `REDIS_URL`, or `REDIS_HOST` / `REDIS_PORT` / `REDIS_DB` /
    ///   `REDIS_USERNAME` / `REDIS_PASSWORD`
    /// - `DISPATCH_KEY_PREFIX`, `CREDENTIAL_PREFIX`
    /// - `CREDENTIAL_PENALTY_SECS`, `UPSTREAM_RETRY_BACKOFF_MS`
    /// - `TARGET_PROBE_TIMEOUT_SECS`, `TARGET_DELIVERY_TIMEOUT_SECS`
    /// - `FAILED_QUEUE_CAPACITY`, `AUDIT_LOG_CAPACITY`, `LOG_RETENTION_HOURS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let redis_url = match get("REDIS_URL") {
            Some(url) => url,
            None => redis_url_from_parts(&get),
        };

        let config = Self {
            redis_url,
            key_prefix: get("DISPATCH_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            credential_prefix: get("CREDENTIAL_PREFIX").unwrap_or(defaults.credential_prefix),
            credential_penalty: parse_or(&get, "CREDENTIAL_PENALTY_SECS", 300).map(Duration::from_secs)?,
            retry_backoff: parse_or(&get, "UPSTREAM_RETRY_BACKOFF_MS", 1_000).map(Duration::from_millis)?,
            probe_timeout: parse_or(&get, "TARGET_PROBE_TIMEOUT_SECS", 10).map(Duration::from_secs)?,
            delivery_timeout: parse_or(&get, "TARGET_DELIVERY_TIMEOUT_SECS", 10).map(Duration::from_secs)?,
            failed_queue_capacity: parse_or(&get, "FAILED_QUEUE_CAPACITY", defaults.failed_queue_capacity)?,
            audit_log_capacity: parse_or(&get, "AUDIT_LOG_CAPACITY", defaults.audit_log_capacity)?,
            audit_log_retention: parse_or(&get, "LOG_RETENTION_HOURS", 48u64)
                .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))?,
        };

        tracing::info!(
            key_prefix = %config.key_prefix,
            penalty_secs = config.credential_penalty.as_secs(),
            failed_queue_capacity = config.failed_queue_capacity,
            "dispatch configuration loaded"
        );

        Ok(config)
    }
}

fn redis_url_from_parts<G>(get: &G) -> String
where
    G: Fn(&str) -> Option<String>,
{
    let host = get("REDIS_HOST").unwrap_or_else(|| "localhost".to_string());
    let port = get("REDIS_PORT").unwrap_or_else(|| "6380".to_string());
    let db = get("REDIS_DB").unwrap_or_else(|| "0".to_string());
    let auth = match (get("REDIS_USERNAME"), get("REDIS_PASSWORD")) {
        (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
        (None, Some(pass)) => format!(":{}@", pass),
        _ => String::new(),
    };
    format!("redis://{}{}:{}/{}", auth, host, port, db)
}

fn parse_or<G, T>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(var) {
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(_) => Err(ConfigError::Invalid { var, value }),
        },
        None => Ok(default),
    }
}
