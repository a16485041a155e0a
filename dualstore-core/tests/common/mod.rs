// Common helpers for dualstore integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dualstore_backends::{FaultInjectingStore, MemoryDocumentStore, RedbStore};
use dualstore_core::{
    CircuitBreaker, CircuitBreakerConfig, DocumentStore, Fields, RetryPolicy, UnifiedDataClient,
};
use serde_json::Value;

pub const TEST_THRESHOLD: u32 = 3;
pub const TEST_COOLDOWN: Duration = Duration::from_secs(300);

/// Client wired to two fault-injecting stores and a private breaker
pub struct Harness<P: DocumentStore, S: DocumentStore> {
    pub primary: Arc<FaultInjectingStore<P>>,
    pub secondary: Arc<FaultInjectingStore<S>>,
    pub breaker: Arc<CircuitBreaker>,
    pub client: UnifiedDataClient,
}

impl<P, S> Harness<P, S>
where
    P: DocumentStore + 'static,
    S: DocumentStore + 'static,
{
    pub fn new(primary: P, secondary: S, policy: RetryPolicy) -> Self {
        let primary = Arc::new(FaultInjectingStore::new(primary));
        let secondary = Arc::new(FaultInjectingStore::new(secondary));
        let breaker = Arc::new(CircuitBreaker::new(
            "integration",
            CircuitBreakerConfig {
                threshold: TEST_THRESHOLD,
                timeout: TEST_COOLDOWN,
            },
        ));
        let client = UnifiedDataClient::new(primary.clone(), secondary.clone())
            .with_breaker(breaker.clone())
            .with_retry_policy(policy);

        Self {
            primary,
            secondary,
            breaker,
            client,
        }
    }
}

/// Two in-memory stores, no retries
pub fn memory_harness() -> Harness<MemoryDocumentStore, MemoryDocumentStore> {
    Harness::new(
        MemoryDocumentStore::named("primary"),
        MemoryDocumentStore::named("secondary"),
        RetryPolicy::no_retry(),
    )
}

/// In-memory primary with a redb secondary, no retries
pub fn redb_harness() -> Harness<MemoryDocumentStore, RedbStore> {
    Harness::new(
        MemoryDocumentStore::named("primary"),
        RedbStore::in_memory()
            .expect("in-memory redb should open")
            .named("secondary"),
        RetryPolicy::no_retry(),
    )
}

/// Fast retry policy without jitter
pub fn quick_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(attempts)
        .with_base_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(40))
        .with_jitter(false)
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
