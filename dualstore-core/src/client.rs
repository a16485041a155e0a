//! Unified Data Client
//!
//! A single CRUD facade over the primary and secondary stores. Every public
//! operation:
//!
//! 1. validates its arguments (fail fast, no retry, no fallback),
//! 2. injects the caller's tenant into write payloads,
//! 3. runs the dual dispatch through the circuit breaker, and
//! 4. retries the whole dual dispatch with backoff on transient failures.
//!
//! ## Dual dispatch
//!
//! ```text
//!   breaker.can_execute()? ──no──▶ secondary ──▶ result / classified error
//!          │ yes
//!          ▼
//!       primary ──ok──▶ record_success ──▶ result
//!          │ err
//!          ▼
//!   record_failure ──▶ secondary ──▶ result / classified error
//! ```
//!
//! Batches are atomic only inside whichever single store ends up executing
//! them; there is no cross-store commit.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, warn, Instrument};

use crate::circuit_breaker::{self, CircuitBreaker};
use crate::config::DataLayerConfig;
use crate::document::{
    BatchOperation, Document, Fields, Filter, OrderBy, QueryResult, QuerySpec, TENANT_FIELD,
};
use crate::error::{DataError, DataResult};
use crate::observability::{data_span, record_duration};
use crate::query::{QueryBuilder, SearchHelper};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::DocumentStore;
use crate::validation::validate_arguments;

/// CRUD facade with circuit-breaker failover between two stores
#[derive(Clone)]
pub struct UnifiedDataClient {
    primary: Arc<dyn DocumentStore>,
    secondary: Arc<dyn DocumentStore>,
    breaker: Arc<CircuitBreaker>,
    retry_policy: RetryPolicy,
}

impl UnifiedDataClient {
    /// Client using the process-wide breaker and default retry policy
    pub fn new(primary: Arc<dyn DocumentStore>, secondary: Arc<dyn DocumentStore>) -> Self {
        Self {
            primary,
            secondary,
            breaker: circuit_breaker::global(),
            retry_policy: RetryPolicy::default_policy(),
        }
    }

    /// Client configured from explicit settings
    ///
    /// The breaker settings only take effect if the process-wide breaker has
    /// not been created yet.
    pub fn from_config(
        primary: Arc<dyn DocumentStore>,
        secondary: Arc<dyn DocumentStore>,
        config: &DataLayerConfig,
    ) -> Self {
        if !circuit_breaker::init_global(config.circuit_breaker_config()) {
            warn!("Process-wide circuit breaker already initialized, keeping existing settings");
        }
        Self {
            primary,
            secondary,
            breaker: circuit_breaker::global(),
            retry_policy: config.retry_policy(),
        }
    }

    /// Use a dedicated breaker instead of the process-wide one
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// A view of this client that retries with `policy`
    ///
    /// Stores and breaker are shared with the original client.
    pub fn with_retry_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            retry_policy: policy,
            ..self.clone()
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn primary(&self) -> &Arc<dyn DocumentStore> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<dyn DocumentStore> {
        &self.secondary
    }

    /// Start a fluent query over one collection of one tenant
    pub fn query_builder(
        &self,
        collection: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> QueryBuilder<'_> {
        QueryBuilder::new(self, collection, tenant_id)
    }

    /// Canned lookups built on the query builder
    pub fn search(&self) -> SearchHelper<'_> {
        SearchHelper::new(self)
    }

    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
        tenant_id: &str,
    ) -> DataResult<Option<Document>> {
        validate_arguments(&[
            ("collection", collection),
            ("doc_id", doc_id),
            ("tenant_id", tenant_id),
        ])?;

        self.with_error_handling("get_document", collection, tenant_id, move || {
            self.with_circuit_breaker(
                "get_document",
                move || self.primary.get_document(collection, doc_id, tenant_id),
                move || self.secondary.get_document(collection, doc_id, tenant_id),
            )
        })
        .await
    }

    /// Create a document owned by `tenant_id`
    ///
    /// Any `tenant_id` already in `data` is overwritten.
    pub async fn create_document(
        &self,
        collection: &str,
        data: Fields,
        tenant_id: &str,
    ) -> DataResult<Document> {
        validate_arguments(&[("collection", collection), ("tenant_id", tenant_id)])?;
        let payload = with_tenant(data, tenant_id);
        let payload = &payload;

        self.with_error_handling("create_document", collection, tenant_id, move || {
            let for_primary = payload.clone();
            let for_secondary = payload.clone();
            self.with_circuit_breaker(
                "create_document",
                move || self.primary.create_document(collection, for_primary),
                move || self.secondary.create_document(collection, for_secondary),
            )
        })
        .await
    }

    /// Merge `data` into an existing document owned by `tenant_id`
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        data: Fields,
        tenant_id: &str,
    ) -> DataResult<Document> {
        validate_arguments(&[
            ("collection", collection),
            ("doc_id", doc_id),
            ("tenant_id", tenant_id),
        ])?;
        let payload = with_tenant(data, tenant_id);
        let payload = &payload;

        self.with_error_handling("update_document", collection, tenant_id, move || {
            let for_primary = payload.clone();
            let for_secondary = payload.clone();
            self.with_circuit_breaker(
                "update_document",
                move || self.primary.update_document(collection, doc_id, for_primary),
                move || self.secondary.update_document(collection, doc_id, for_secondary),
            )
        })
        .await
    }

    pub async fn delete_document(
        &self,
        collection: &str,
        doc_id: &str,
        tenant_id: &str,
    ) -> DataResult<bool> {
        validate_arguments(&[
            ("collection", collection),
            ("doc_id", doc_id),
            ("tenant_id", tenant_id),
        ])?;

        self.with_error_handling("delete_document", collection, tenant_id, move || {
            self.with_circuit_breaker(
                "delete_document",
                move || self.primary.delete_document(collection, doc_id, tenant_id),
                move || self.secondary.delete_document(collection, doc_id, tenant_id),
            )
        })
        .await
    }

    /// Filtered, ordered, paginated listing of one tenant's collection
    pub async fn query_documents(
        &self,
        collection: &str,
        tenant_id: &str,
        filters: Vec<Filter>,
        order_by: Vec<OrderBy>,
        limit: usize,
        offset: usize,
    ) -> DataResult<QueryResult> {
        let spec = QuerySpec {
            filters,
            order_by,
            limit,
            offset,
            ..QuerySpec::new(collection, tenant_id)
        };
        self.query(&spec).await
    }

    /// Execute a prepared query specification
    pub async fn query(&self, spec: &QuerySpec) -> DataResult<QueryResult> {
        validate_arguments(&[
            ("collection", spec.collection.as_str()),
            ("tenant_id", spec.tenant_id.as_str()),
        ])?;

        self.with_error_handling("query_documents", &spec.collection, &spec.tenant_id, move || {
            self.with_circuit_breaker(
                "query_documents",
                move || self.primary.query_documents(spec),
                move || self.secondary.query_documents(spec),
            )
        })
        .await
    }

    /// Apply creates, updates and deletes as one unit on a single store
    pub async fn batch_operation(
        &self,
        operations: Vec<BatchOperation>,
        tenant_id: &str,
    ) -> DataResult<bool> {
        validate_arguments(&[("tenant_id", tenant_id)])?;
        if operations.is_empty() {
            debug!(tenant_id, "Empty batch, nothing to commit");
            return Ok(true);
        }

        let operations = operations
            .into_iter()
            .enumerate()
            .map(|(index, op)| prepare_batch_operation(index, op, tenant_id))
            .collect::<DataResult<Vec<_>>>()?;
        let operations = operations.as_slice();

        self.with_error_handling("batch_operation", "*", tenant_id, move || {
            self.with_circuit_breaker(
                "batch_operation",
                move || self.primary.commit_batch(operations, tenant_id),
                move || self.secondary.commit_batch(operations, tenant_id),
            )
        })
        .await?;

        Ok(true)
    }

    /// Breaker-gated call of `primary`, falling back to `secondary`
    ///
    /// The secondary runs when the breaker refuses the primary or when the
    /// primary fails; only a secondary failure is returned to the caller.
    pub async fn with_circuit_breaker<T, P, PF, PE, S, SF, SE>(
        &self,
        operation: &str,
        primary: P,
        secondary: S,
    ) -> DataResult<T>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Result<T, PE>>,
        PE: Into<DataError>,
        S: FnOnce() -> SF,
        SF: Future<Output = Result<T, SE>>,
        SE: Into<DataError>,
    {
        if !self.breaker.can_execute() {
            debug!(
                operation,
                breaker = self.breaker.name(),
                store = self.secondary.name(),
                "Circuit open, routing to secondary store"
            );
            return secondary().await.map_err(Into::into);
        }

        match primary().await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                let error: DataError = e.into();
                self.breaker.record_failure();
                warn!(
                    operation,
                    primary = self.primary.name(),
                    secondary = self.secondary.name(),
                    error_code = error.error_code(),
                    error = %error,
                    "Primary store failed, falling back to secondary"
                );
                secondary().await.map_err(Into::into)
            }
        }
    }

    async fn with_error_handling<T, F, Fut>(
        &self,
        operation: &'static str,
        collection: &str,
        tenant_id: &str,
        call: F,
    ) -> DataResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DataResult<T>>,
    {
        let span = data_span(operation, collection, tenant_id);

        async move {
            let start = Instant::now();
            let result = retry_with_backoff(&self.retry_policy, operation, call).await;
            let duration_ms = record_duration(start);

            match &result {
                Ok(_) => debug!(operation, duration_ms, "Data operation succeeded"),
                Err(e) => error!(
                    operation,
                    duration_ms,
                    error_code = e.error_code(),
                    error = %e,
                    "Data operation failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for UnifiedDataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedDataClient")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .field("breaker", &self.breaker)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

/// Stamp the caller's tenant onto a write payload
fn with_tenant(mut data: Fields, tenant_id: &str) -> Fields {
    let previous = data.insert(TENANT_FIELD.to_string(), Value::String(tenant_id.to_string()));
    if let Some(previous) = previous {
        if previous.as_str() != Some(tenant_id) {
            debug!(tenant_id, supplied = %previous, "Overriding tenant_id in payload");
        }
    }
    data
}

fn prepare_batch_operation(
    index: usize,
    operation: BatchOperation,
    tenant_id: &str,
) -> DataResult<BatchOperation> {
    if operation.collection().trim().is_empty() {
        return Err(DataError::validation(format!(
            "Batch operation {} ({}) is missing collection",
            index,
            operation.kind()
        )));
    }
    if matches!(operation.doc_id(), Some(id) if id.trim().is_empty()) {
        return Err(DataError::validation(format!(
            "Batch operation {} ({}) is missing doc_id",
            index,
            operation.kind()
        )));
    }
    if operation.collection().contains('\0') || matches!(operation.doc_id(), Some(id) if id.contains('\0')) {
        return Err(DataError::validation(format!(
            "Batch operation {} ({}) has a NUL byte in its key",
            index,
            operation.kind()
        )));
    }

    Ok(match operation {
        BatchOperation::Create { collection, data } => BatchOperation::Create {
            collection,
            data: with_tenant(data, tenant_id),
        },
        BatchOperation::Update {
            collection,
            doc_id,
            data,
        } => BatchOperation::Update {
            collection,
            doc_id,
            data: with_tenant(data, tenant_id),
        },
        delete @ BatchOperation::Delete { .. } => delete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerState};
    use crate::error::{ErrorKind, StoreError};
    use crate::test_helpers::RecordingStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn client(primary: Arc<RecordingStore>, secondary: Arc<RecordingStore>) -> UnifiedDataClient {
        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                threshold: 3,
                timeout: Duration::from_secs(300),
            },
        ));
        UnifiedDataClient::new(primary, secondary)
            .with_breaker(breaker)
            .with_retry_policy(RetryPolicy::no_retry())
    }

    fn payload(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("fixture must be an object"),
        }
    }

    #[tokio::test]
    async fn test_open_breaker_never_invokes_primary() {
        let client = client(RecordingStore::shared("p"), RecordingStore::shared("s"));
        client.breaker().force_open();
        let primary_calls = AtomicU32::new(0);

        let result = client
            .with_circuit_breaker(
                "op",
                || async {
                    primary_calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, DataError>("primary")
                },
                || async { Ok::<_, DataError>("secondary") },
            )
            .await
            .unwrap();

        assert_eq!(result, "secondary");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_closed_breaker_success_skips_secondary() {
        let client = client(RecordingStore::shared("p"), RecordingStore::shared("s"));
        let secondary_calls = AtomicU32::new(0);

        let result = client
            .with_circuit_breaker(
                "op",
                || async { Ok::<_, DataError>(1) },
                || async {
                    secondary_calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, DataError>(2)
                },
            )
            .await
            .unwrap();

        assert_eq!(result, 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.breaker().state(), CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back_and_counts() {
        let client = client(RecordingStore::shared("p"), RecordingStore::shared("s"));

        let result = client
            .with_circuit_breaker(
                "op",
                || async { Err::<u32, _>(StoreError::Unavailable("down".into())) },
                || async { Ok::<_, StoreError>(2) },
            )
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(client.breaker().failures(), 1);
    }

    #[tokio::test]
    async fn test_both_stores_failing_surfaces_secondary_error() {
        let client = client(RecordingStore::shared("p"), RecordingStore::shared("s"));

        let err = client
            .with_circuit_breaker(
                "op",
                || async { Err::<u32, _>(StoreError::Unavailable("primary down".into())) },
                || async { Err::<u32, _>(StoreError::Unauthenticated("bad key".into())) },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_create_overwrites_tenant() {
        let primary = RecordingStore::shared("p");
        let client = client(primary.clone(), RecordingStore::shared("s"));

        let doc = client
            .create_document(
                "students",
                payload(json!({ "name": "Ada", "tenant_id": "intruder" })),
                "t1",
            )
            .await
            .unwrap();

        assert_eq!(doc.tenant_id, "t1");
        let sent = primary.last_payload().unwrap();
        assert_eq!(sent.get("tenant_id"), Some(&json!("t1")));
    }

    #[tokio::test]
    async fn test_validation_fails_before_dispatch() {
        let primary = RecordingStore::shared("p");
        let secondary = RecordingStore::shared("s");
        let client = client(primary.clone(), secondary.clone());

        let err = client.get_document("students", "", "t1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("doc_id"));

        assert_eq!(primary.calls(), 0);
        assert_eq!(secondary.calls(), 0);
        assert_eq!(client.breaker().failures(), 0);
    }

    #[tokio::test]
    async fn test_batch_validation_and_tenant_injection() {
        let primary = RecordingStore::shared("p");
        let client = client(primary.clone(), RecordingStore::shared("s"));

        let err = client
            .batch_operation(
                vec![BatchOperation::Delete {
                    collection: "students".into(),
                    doc_id: " ".into(),
                }],
                "t1",
            )
            .await
            .unwrap_err();
        assert!(err.message().contains("doc_id"));

        let ok = client
            .batch_operation(
                vec![BatchOperation::Create {
                    collection: "students".into(),
                    data: payload(json!({ "name": "Ada" })),
                }],
                "t1",
            )
            .await
            .unwrap();
        assert!(ok);

        let batch = primary.last_batch().unwrap();
        match &batch[0] {
            BatchOperation::Create { data, .. } => {
                assert_eq!(data.get("tenant_id"), Some(&json!("t1")))
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_policy_override_shares_breaker() {
        let base = client(RecordingStore::shared("p"), RecordingStore::shared("s"));
        let tuned = base.with_retry_policy(RetryPolicy::default().with_max_attempts(7));

        assert_eq!(tuned.retry_policy().max_attempts, 7);
        assert!(Arc::ptr_eq(base.breaker(), tuned.breaker()));
    }
}
