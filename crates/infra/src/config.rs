//! Environment-driven service configuration.

use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime configuration for the inventory service.
///
/// Absent `database_url`/`redis_url` select the in-process drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryConfig {
    pub http_addr: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub cache_ttl: Duration,
    /// `None` keeps reservations until they are released explicitly.
    pub reservation_hold: Option<Duration>,
    pub reaper_interval: Duration,
    pub ledger_retry: RetryPolicy,
    /// `None` disables the reservation deadline.
    pub reserve_timeout: Option<Duration>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8082".to_string(),
            database_url: None,
            redis_url: None,
            cache_ttl: Duration::from_secs(3600),
            reservation_hold: Some(Duration::from_secs(900)),
            reaper_interval: Duration::from_secs(30),
            ledger_retry: RetryPolicy::exponential(
                3,
                Duration::from_millis(50),
                Duration::from_secs(2),
            ),
            reserve_timeout: Some(Duration::from_millis(5000)),
        }
    }
}

impl InventoryConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup. Unset or blank keys
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let http_addr = get("HTTP_ADDR").unwrap_or(defaults.http_addr);
        let cache_ttl = match get("CACHE_TTL_SECS") {
            Some(v) => Duration::from_secs(parse_u64("CACHE_TTL_SECS", &v)?),
            None => defaults.cache_ttl,
        };
        let reservation_hold = match get("RESERVATION_HOLD_SECS") {
            Some(v) => match parse_u64("RESERVATION_HOLD_SECS", &v)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => defaults.reservation_hold,
        };
        let reaper_interval = match get("REAPER_INTERVAL_SECS") {
            Some(v) => match parse_u64("REAPER_INTERVAL_SECS", &v)? {
                0 => {
                    return Err(ConfigError::Invalid {
                        key: "REAPER_INTERVAL_SECS",
                        value: v,
                    });
                }
                secs => Duration::from_secs(secs),
            },
            None => defaults.reaper_interval,
        };

        let mut ledger_retry = defaults.ledger_retry;
        if let Some(v) = get("LEDGER_RETRY_ATTEMPTS") {
            ledger_retry.max_attempts = parse_u64("LEDGER_RETRY_ATTEMPTS", &v)?
                .try_into()
                .map_err(|_| ConfigError::Invalid {
                    key: "LEDGER_RETRY_ATTEMPTS",
                    value: v.clone(),
                })?;
        }
        if let Some(v) = get("LEDGER_RETRY_BASE_MS") {
            ledger_retry.base_delay = Duration::from_millis(parse_u64("LEDGER_RETRY_BASE_MS", &v)?);
        }

        let reserve_timeout = match get("RESERVE_TIMEOUT_MS") {
            Some(v) => match parse_u64("RESERVE_TIMEOUT_MS", &v)? {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            None => defaults.reserve_timeout,
        };

        Ok(Self {
            http_addr,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            cache_ttl,
            reservation_hold,
            reaper_interval,
            ledger_retry,
            reserve_timeout,
        })
    }
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
