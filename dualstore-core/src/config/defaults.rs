//! Default configuration values for the data access layer
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Circuit breaker defaults
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 3;
pub const DEFAULT_CIRCUIT_BREAKER_TIMEOUT_SECS: u64 = 300; // 5 minutes

// Retry defaults
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_SECS: f64 = 1.0;
pub const DEFAULT_RETRY_MAX_DELAY_SECS: f64 = 60.0;
pub const DEFAULT_RETRY_EXPONENTIAL_BASE: f64 = 2.0;
pub const DEFAULT_RETRY_JITTER_ENABLED: bool = true;

// Logging defaults
pub const DEFAULT_LOG_FILTER: &str = "dualstore_core=info,dualstore_backends=info";

/// Helper to create Duration from seconds
pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
