//! Store adapter contract
//!
//! Both the primary document store and the secondary relational store are
//! consumed through [`DocumentStore`]. Adapters must return an error on
//! failure rather than a sentinel value: failures are what drive the circuit
//! breaker and the fallback to the secondary store.

use async_trait::async_trait;

use crate::document::{BatchOperation, Document, Fields, QueryResult, QuerySpec};
use crate::error::StoreResult;

/// Backend adapter used by the unified client
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Fetch one document scoped to a tenant
    async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
        tenant_id: &str,
    ) -> StoreResult<Option<Document>>;

    /// Insert a document; `data` already carries `tenant_id`
    ///
    /// An `id` key in `data` is used as the document id, otherwise the
    /// adapter generates one.
    async fn create_document(&self, collection: &str, data: Fields) -> StoreResult<Document>;

    /// Merge `data` into an existing document of the tenant named in `data`
    async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        data: Fields,
    ) -> StoreResult<Document>;

    /// Delete a document; returns whether it existed
    async fn delete_document(
        &self,
        collection: &str,
        doc_id: &str,
        tenant_id: &str,
    ) -> StoreResult<bool>;

    /// Run a query; `total` in the result counts matches before pagination
    async fn query_documents(&self, query: &QuerySpec) -> StoreResult<QueryResult>;

    /// Apply every operation or none of them
    async fn commit_batch(&self, operations: &[BatchOperation], tenant_id: &str)
        -> StoreResult<()>;
}
