//! Lazily created process-wide settings fall back to defaults when the
//! environment is unusable. Own binary: the singletons are per-process.

use std::sync::Arc;

use dualstore_backends::MemoryDocumentStore;
use dualstore_core::config::{ENV_CIRCUIT_BREAKER_THRESHOLD, ENV_RETRY_MAX_DELAY_SECS};
use dualstore_core::{CircuitBreakerConfig, RetryPolicy, UnifiedDataClient};
use pretty_assertions::assert_eq;
use serial_test::serial;

#[test]
#[serial]
fn test_out_of_range_environment_falls_back_to_defaults() {
    std::env::set_var(ENV_CIRCUIT_BREAKER_THRESHOLD, "7");
    std::env::set_var(ENV_RETRY_MAX_DELAY_SECS, "1e30");

    let client = UnifiedDataClient::new(
        Arc::new(MemoryDocumentStore::named("primary")),
        Arc::new(MemoryDocumentStore::named("secondary")),
    );

    std::env::remove_var(ENV_CIRCUIT_BREAKER_THRESHOLD);
    std::env::remove_var(ENV_RETRY_MAX_DELAY_SECS);

    assert_eq!(client.breaker().config(), &CircuitBreakerConfig::default());
    assert_eq!(client.retry_policy(), &RetryPolicy::default());
}
