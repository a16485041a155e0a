//! Fault injection wrapper for store adapters
//!
//! Wraps any [`DocumentStore`] and makes it fail or slow down on demand, so
//! tests can drive the circuit breaker and retry paths against a real store.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use dualstore_core::document::{BatchOperation, Document, Fields, QueryResult, QuerySpec};
use dualstore_core::{DocumentStore, StoreError, StoreResult};

/// How the wrapper currently treats calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    Healthy,
    /// Fail this many upcoming calls, then recover
    FailNext(u32),
    /// Fail every call until [`FaultInjectingStore::heal`]
    FailUntilHealed,
}

#[derive(Debug)]
struct FaultState {
    mode: FaultMode,
    error: StoreError,
    latency: Option<Duration>,
}

/// [`DocumentStore`] decorator with scriptable failures
pub struct FaultInjectingStore<S> {
    inner: S,
    state: Mutex<FaultState>,
    calls: DashMap<&'static str, u64>,
    injected: DashMap<&'static str, u64>,
}

impl<S: DocumentStore> FaultInjectingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            state: Mutex::new(FaultState {
                mode: FaultMode::Healthy,
                error: StoreError::Unavailable("injected fault".to_string()),
                latency: None,
            }),
            calls: DashMap::new(),
            injected: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn mode(&self) -> FaultMode {
        self.state.lock().mode
    }

    pub fn fail_next(&self, count: u32) {
        self.state.lock().mode = FaultMode::FailNext(count);
    }

    pub fn fail_until_healed(&self) {
        self.state.lock().mode = FaultMode::FailUntilHealed;
    }

    pub fn heal(&self) {
        self.state.lock().mode = FaultMode::Healthy;
    }

    /// Error returned by injected failures
    pub fn set_error(&self, error: StoreError) {
        self.state.lock().error = error;
    }

    /// Delay applied before every call, failing or not
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Calls seen for one operation, e.g. `"get_document"`
    pub fn calls(&self, operation: &str) -> u64 {
        self.calls.get(operation).map(|count| *count).unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    /// Calls that were answered with an injected error
    pub fn injected_failures(&self) -> u64 {
        self.injected.iter().map(|entry| *entry.value()).sum()
    }

    async fn intercept(&self, operation: &'static str) -> StoreResult<()> {
        *self.calls.entry(operation).or_insert(0) += 1;

        let (failure, latency) = {
            let mut state = self.state.lock();
            let failure = match state.mode {
                FaultMode::Healthy => None,
                FaultMode::FailNext(remaining) => {
                    state.mode = if remaining <= 1 {
                        FaultMode::Healthy
                    } else {
                        FaultMode::FailNext(remaining - 1)
                    };
                    (remaining > 0).then(|| state.error.clone())
                }
                FaultMode::FailUntilHealed => Some(state.error.clone()),
            };
            (failure, state.latency)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match failure {
            Some(error) => {
                *self.injected.entry(operation).or_insert(0) += 1;
                warn!(store = %self.inner.name(), operation, error = %error, "Injecting store fault");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for FaultInjectingStore<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
        tenant_id: &str,
    ) -> StoreResult<Option<Document>> {
        self.intercept("get_document").await?;
        self.inner.get_document(collection, doc_id, tenant_id).await
    }

    async fn create_document(&self, collection: &str, data: Fields) -> StoreResult<Document> {
        self.intercept("create_document").await?;
        self.inner.create_document(collection, data).await
    }

    async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        data: Fields,
    ) -> StoreResult<Document> {
        self.intercept("update_document").await?;
        self.inner.update_document(collection, doc_id, data).await
    }

    async fn delete_document(
        &self,
        collection: &str,
        doc_id: &str,
        tenant_id: &str,
    ) -> StoreResult<bool> {
        self.intercept("delete_document").await?;
        self.inner.delete_document(collection, doc_id, tenant_id).await
    }

    async fn query_documents(&self, query: &QuerySpec) -> StoreResult<QueryResult> {
        self.intercept("query_documents").await?;
        self.inner.query_documents(query).await
    }

    async fn commit_batch(
        &self,
        operations: &[BatchOperation],
        tenant_id: &str,
    ) -> StoreResult<()> {
        self.intercept("commit_batch").await?;
        self.inner.commit_batch(operations, tenant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDocumentStore;
    use serde_json::{json, Value};

    fn store() -> FaultInjectingStore<MemoryDocumentStore> {
        FaultInjectingStore::new(MemoryDocumentStore::named("primary"))
    }

    #[tokio::test]
    async fn test_fail_next_recovers() {
        let store = store();
        store.fail_next(2);

        assert!(store.get_document("c", "1", "t1").await.is_err());
        assert!(store.get_document("c", "1", "t1").await.is_err());
        assert!(store.get_document("c", "1", "t1").await.is_ok());

        assert_eq!(store.mode(), FaultMode::Healthy);
        assert_eq!(store.calls("get_document"), 3);
        assert_eq!(store.injected_failures(), 2);
    }

    #[tokio::test]
    async fn test_fail_until_healed_uses_configured_error() {
        let store = store();
        store.set_error(StoreError::Unauthenticated("token expired".into()));
        store.fail_until_healed();

        for _ in 0..5 {
            let err = store.delete_document("c", "1", "t1").await.unwrap_err();
            assert!(matches!(err, StoreError::Unauthenticated(_)));
        }

        store.heal();
        assert!(!store.delete_document("c", "1", "t1").await.unwrap());
        assert_eq!(store.total_calls(), 6);
    }

    #[tokio::test]
    async fn test_injected_failure_never_reaches_inner() {
        let store = store();
        store.fail_next(1);

        let Value::Object(data) = json!({ "tenant_id": "t1" }) else {
            unreachable!()
        };
        assert!(store.create_document("c", data).await.is_err());
        assert!(store.inner().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let store = store();
        store.set_latency(Some(Duration::from_millis(250)));

        let start = tokio::time::Instant::now();
        store.get_document("c", "1", "t1").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
