//! Configuration for the data access layer
//!
//! Recognized options mirror the deployment settings of the service:
//! `circuit_breaker_threshold`, `circuit_breaker_timeout`,
//! `retry_max_attempts`, `retry_base_delay`, `retry_max_delay`,
//! `retry_exponential_base` and `retry_jitter_enabled`. Values come from
//! defaults, a TOML file, or `DUALSTORE_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{DataError, DataResult};
use crate::retry::RetryPolicy;

pub mod defaults;

pub use defaults::*;

pub const ENV_CIRCUIT_BREAKER_THRESHOLD: &str = "DUALSTORE_CIRCUIT_BREAKER_THRESHOLD";
pub const ENV_CIRCUIT_BREAKER_TIMEOUT_SECS: &str = "DUALSTORE_CIRCUIT_BREAKER_TIMEOUT_SECS";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "DUALSTORE_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_SECS: &str = "DUALSTORE_RETRY_BASE_DELAY_SECS";
pub const ENV_RETRY_MAX_DELAY_SECS: &str = "DUALSTORE_RETRY_MAX_DELAY_SECS";
pub const ENV_RETRY_EXPONENTIAL_BASE: &str = "DUALSTORE_RETRY_EXPONENTIAL_BASE";
pub const ENV_RETRY_JITTER_ENABLED: &str = "DUALSTORE_RETRY_JITTER_ENABLED";

/// Settings consumed by the breaker and the retry executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLayerConfig {
    /// Consecutive primary failures that open the breaker
    pub circuit_breaker_threshold: u32,

    /// Cool-down before an open breaker allows a half-open trial
    #[serde(with = "humantime_serde")]
    pub circuit_breaker_timeout: Duration,

    pub retry_max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,

    pub retry_exponential_base: f64,

    pub retry_jitter_enabled: bool,
}

impl Default for DataLayerConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            circuit_breaker_timeout: duration_secs(DEFAULT_CIRCUIT_BREAKER_TIMEOUT_SECS),
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_delay: Duration::from_secs_f64(DEFAULT_RETRY_BASE_DELAY_SECS),
            retry_max_delay: Duration::from_secs_f64(DEFAULT_RETRY_MAX_DELAY_SECS),
            retry_exponential_base: DEFAULT_RETRY_EXPONENTIAL_BASE,
            retry_jitter_enabled: DEFAULT_RETRY_JITTER_ENABLED,
        }
    }
}

impl DataLayerConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables layered over defaults
    pub fn from_env() -> DataResult<Self> {
        let mut config = Self::default();

        if let Some(val) = env_parse::<u32>(ENV_CIRCUIT_BREAKER_THRESHOLD)? {
            config.circuit_breaker_threshold = val;
        }
        if let Some(secs) = env_parse::<u64>(ENV_CIRCUIT_BREAKER_TIMEOUT_SECS)? {
            config.circuit_breaker_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = env_parse::<u32>(ENV_RETRY_MAX_ATTEMPTS)? {
            config.retry_max_attempts = val;
        }
        if let Some(secs) = env_parse_secs(ENV_RETRY_BASE_DELAY_SECS)? {
            config.retry_base_delay = secs;
        }
        if let Some(secs) = env_parse_secs(ENV_RETRY_MAX_DELAY_SECS)? {
            config.retry_max_delay = secs;
        }
        if let Some(val) = env_parse::<f64>(ENV_RETRY_EXPONENTIAL_BASE)? {
            config.retry_exponential_base = val;
        }
        if let Some(val) = env_parse::<bool>(ENV_RETRY_JITTER_ENABLED)? {
            config.retry_jitter_enabled = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> DataResult<Self> {
        let config: DataLayerConfig = toml::from_str(contents)
            .map_err(|e| DataError::validation(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> DataResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DataError::validation(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate the configuration
    pub fn validate(&self) -> DataResult<()> {
        if self.circuit_breaker_threshold == 0 {
            return Err(DataError::validation(
                "circuit_breaker_threshold must be at least 1",
            ));
        }

        if self.circuit_breaker_timeout.is_zero() {
            return Err(DataError::validation(
                "circuit_breaker_timeout must be greater than zero",
            ));
        }

        if self.retry_max_attempts == 0 {
            return Err(DataError::validation("retry_max_attempts must be at least 1"));
        }

        if self.retry_base_delay > self.retry_max_delay {
            return Err(DataError::validation(
                "retry_base_delay cannot exceed retry_max_delay",
            ));
        }

        if !self.retry_exponential_base.is_finite() || self.retry_exponential_base < 1.0 {
            return Err(DataError::validation(
                "retry_exponential_base must be a finite number >= 1.0",
            ));
        }

        Ok(())
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            threshold: self.circuit_breaker_threshold,
            timeout: self.circuit_breaker_timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            exponential_base: self.retry_exponential_base,
            jitter: self.retry_jitter_enabled,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> DataResult<Option<T>> {
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DataError::validation(format!("Invalid {}", key))),
        Err(_) => Ok(None),
    }
}

fn env_parse_secs(key: &str) -> DataResult<Option<Duration>> {
    match env_parse::<f64>(key)? {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|_| DataError::validation(format!("Invalid {}", key))),
        None => Ok(None),
    }
}
