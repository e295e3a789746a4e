//! Runtime configuration
//!
//! Read from `TYPING_RELAY_*` environment variables, falling back to
//! defaults. The binary lets its first argument override the bind address.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Channel buffer size for outbound messages and session control
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// WebSocket bind address
    pub bind_addr: String,
    /// Buffer of per-connection outbound and per-session control channels
    pub channel_buffer: usize,
    /// Emit `typing_progress` every N characters
    pub progress_every: usize,
    /// How long terminal or idle sessions stay visible
    pub retention: Duration,
    /// Period of the eviction sweep
    pub reap_interval: Duration,
    /// Base seed for reproducible delays; entropy when unset
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
            progress_every: 5,
            retention: Duration::from_secs(60),
            reap_interval: Duration::from_secs(15),
            seed: None,
        }
    }
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let channel_buffer = positive(&lookup, "TYPING_RELAY_CHANNEL_BUFFER", defaults.channel_buffer)?;
        let progress_every = positive(&lookup, "TYPING_RELAY_PROGRESS_EVERY", defaults.progress_every)?;
        let retention = positive(&lookup, "TYPING_RELAY_RETENTION_SECS", defaults.retention.as_secs())?;
        let reap_interval = positive(
            &lookup,
            "TYPING_RELAY_REAP_INTERVAL_SECS",
            defaults.reap_interval.as_secs(),
        )?;
        let seed = match lookup("TYPING_RELAY_SEED") {
            Some(_) => Some(parse(&lookup, "TYPING_RELAY_SEED", 0u64)?),
            None => None,
        };

        Ok(Self {
            bind_addr: lookup("TYPING_RELAY_ADDR").unwrap_or(defaults.bind_addr),
            channel_buffer,
            progress_every,
            retention: Duration::from_secs(retention),
            reap_interval: Duration::from_secs(reap_interval),
            seed,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

/// Like `parse` but rejects zero
fn positive<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
{
    let value = parse(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: lookup(key).unwrap_or_default(),
        });
    }
    Ok(value)
}
