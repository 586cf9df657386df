//! Configuration for pools and transaction retries.
//!
//! Both types deserialize from any serde format, with every field optional
//! and durations written in humantime notation (`"250ms"`, `"30s"`, `"10m"`).
//!
//! ```
//! use std::time::Duration;
//! use storage_api::config::PoolConfig;
//!
//! let config: PoolConfig = serde_json::from_str(r#"{
//!     "max_connections": 4,
//!     "acquire_timeout": "250ms"
//! }"#).unwrap();
//!
//! assert_eq!(config.max_connections, 4);
//! assert_eq!(config.acquire_timeout, Some(Duration::from_millis(250)));
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a connection pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections handed out at once (0 = unbounded).
    pub max_connections: u32,

    /// Maximum number of idle sessions kept for reuse. `None` follows
    /// `max_connections` (and keeps every session in an unbounded pool).
    pub max_idle: Option<u32>,

    /// How long `conn` waits for a free slot before failing with
    /// `ConnectionUnavailable`. `None` waits until canceled.
    #[serde(with = "humantime_serde_opt")]
    pub acquire_timeout: Option<Duration>,

    /// Idle sessions unused for longer than this are terminated instead of
    /// reused. `None` keeps them forever.
    #[serde(with = "humantime_serde_opt")]
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_idle: None,
            acquire_timeout: Some(Duration::from_secs(30)),
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
        }
    }
}

impl PoolConfig {
    /// Creates a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of connections.
    ///
    /// Unless [`with_max_idle`](Self::with_max_idle) is also called, the
    /// idle limit follows this value.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the maximum number of idle sessions.
    pub fn with_max_idle(mut self, max: u32) -> Self {
        self.max_idle = Some(max);
        self
    }

    /// Sets the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Returns the idle limit in effect.
    pub fn effective_max_idle(&self) -> u32 {
        match (self.max_idle, self.is_unbounded()) {
            (Some(max), _) => max,
            (None, true) => u32::MAX,
            (None, false) => self.max_connections,
        }
    }

    /// Returns `true` if the pool has no connection limit.
    pub fn is_unbounded(&self) -> bool {
        self.max_connections == 0
    }

    /// Checks the configuration for inconsistent values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(max_idle) = self.max_idle {
            if !self.is_unbounded() && max_idle > self.max_connections {
                return Err(ConfigError::InvalidValue {
                    field: "max_idle".to_string(),
                    message: format!(
                        "{} exceeds max_connections ({})",
                        max_idle, self.max_connections
                    ),
                });
            }
        }
        if self.acquire_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidValue {
                field: "acquire_timeout".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Retry configuration for transactions that fail with a transient error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Upper bound for the delay between retries.
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(10)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Sets the maximum number of retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Returns the delay to wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let nanos = (self.initial_delay.as_nanos() as f64 * factor).min(u64::MAX as f64);
        Duration::from_nanos(nanos as u64).min(self.max_delay)
    }
}

/// Serde module for Duration with humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde module for optional durations; `null` means "no limit".
mod humantime_serde_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
