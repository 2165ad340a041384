//! Dispatcher configuration.
//!
//! Defaults are sized for the host; every value can be overridden from the
//! environment (or a `.env` file):
//! - `HERALD_POOL_SIZE`
//! - `HERALD_RETRY_MAX_ATTEMPTS`
//! - `HERALD_RETRY_INITIAL_DELAY_MS`

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::notification::ExponentialBackoff;
use crate::{Error, Result};

pub const ENV_POOL_SIZE: &str = "HERALD_POOL_SIZE";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "HERALD_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_INITIAL_DELAY_MS: &str = "HERALD_RETRY_INITIAL_DELAY_MS";

/// Pool size used when the host parallelism cannot be determined.
const FALLBACK_POOL_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of delivery workers.
    pub pool_size: usize,
    pub retry: RetryConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let pool_size = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_POOL_SIZE);
        Self {
            pool_size,
            retry: RetryConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// Load `.env` if present, then apply environment overrides on top of the
    /// defaults.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` on top of the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = parse_var(&lookup, ENV_POOL_SIZE)? {
            config.pool_size = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_RETRY_MAX_ATTEMPTS)? {
            config.retry.max_attempts = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_RETRY_INITIAL_DELAY_MS)? {
            config.retry.initial_delay_ms = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::config("pool_size must be greater than zero"));
        }
        self.retry.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles on each further one.
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config("retry max_attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn policy(&self) -> Result<ExponentialBackoff> {
        ExponentialBackoff::new(self.max_attempts, self.initial_delay())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| Error::config(format!("invalid value '{}' for {}: {}", raw, key, e)))
}
