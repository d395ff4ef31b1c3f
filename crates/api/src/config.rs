use std::env;
use std::str::FromStr;
use std::time::Duration;

use folio_core::dispatch::webhook::WebhookConfig;
use folio_core::scheduler::DEFAULT_BATCH_LIMIT;

/// Failure while reading configuration from the environment.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host to bind to.
    pub host: String,
    /// Server port to bind to.
    pub port: u16,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Maximum database connections in the pool.
    pub db_max_connections: u32,
    /// Minimum database connections in the pool.
    pub db_min_connections: u32,
    /// Event bus channel capacity.
    pub event_bus_capacity: usize,
    /// Log level (e.g., "info", "debug", "trace").
    pub log_level: String,
    /// Bearer secret for the cron endpoint. The endpoint is disabled without one.
    pub cron_secret: Option<String>,
    /// Revisions released per sweep.
    pub scheduler_batch_limit: i64,
    /// Seconds between in-process sweeps; 0 turns the loop off.
    pub scheduler_interval_secs: u64,
    pub webhook_timeout_secs: u64,
    pub webhook_max_attempts: u32,
    pub webhook_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
            database_url: String::new(),
            db_max_connections: 20,
            db_min_connections: 5,
            event_bus_capacity: 1024,
            log_level: "info".to_string(),
            cron_secret: None,
            scheduler_batch_limit: DEFAULT_BATCH_LIMIT,
            scheduler_interval_secs: 60,
            webhook_timeout_secs: 10,
            webhook_max_attempts: 3,
            webhook_backoff_ms: 1000,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse(&var, "PORT", defaults.port)?,
            database_url: var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            db_max_connections: parse(&var, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            db_min_connections: parse(&var, "DB_MIN_CONNECTIONS", defaults.db_min_connections)?,
            event_bus_capacity: parse(&var, "EVENT_BUS_CAPACITY", defaults.event_bus_capacity)?,
            log_level: var("LOG_LEVEL").unwrap_or(defaults.log_level),
            cron_secret: var("CRON_SECRET"),
            scheduler_batch_limit: parse_positive(
                &var,
                "SCHEDULER_BATCH_LIMIT",
                defaults.scheduler_batch_limit,
            )?,
            scheduler_interval_secs: parse(
                &var,
                "SCHEDULER_INTERVAL_SECS",
                defaults.scheduler_interval_secs,
            )?,
            webhook_timeout_secs: parse(&var, "WEBHOOK_TIMEOUT_SECS", defaults.webhook_timeout_secs)?,
            webhook_max_attempts: parse(&var, "WEBHOOK_MAX_ATTEMPTS", defaults.webhook_max_attempts)?,
            webhook_backoff_ms: parse(&var, "WEBHOOK_BACKOFF_MS", defaults.webhook_backoff_ms)?,
        })
    }

    /// Build the socket address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Interval of the in-process sweep, if enabled.
    pub fn scheduler_interval(&self) -> Option<Duration> {
        (self.scheduler_interval_secs > 0).then(|| Duration::from_secs(self.scheduler_interval_secs))
    }

    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            timeout: Duration::from_secs(self.webhook_timeout_secs),
            max_attempts: self.webhook_max_attempts.max(1),
            backoff: Duration::from_millis(self.webhook_backoff_ms),
        }
    }
}

fn parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

/// Like [`parse`], but the value must be at least 1.
fn parse_positive(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: i64,
) -> Result<i64, ConfigError> {
    let value = parse(var, key, default)?;
    if value < 1 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}
