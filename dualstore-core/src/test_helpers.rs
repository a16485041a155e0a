//! Test doubles for unit tests inside this crate

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::document::{BatchOperation, Document, Fields, QueryResult, QuerySpec};
use crate::error::StoreResult;
use crate::store::DocumentStore;

/// Store that records what it was asked to do and always succeeds
pub struct RecordingStore {
    name: String,
    calls: AtomicU32,
    last_payload: Mutex<Option<Fields>>,
    last_batch: Mutex<Option<Vec<BatchOperation>>>,
    last_query: Mutex<Option<QuerySpec>>,
    query_items: Mutex<Vec<Document>>,
}

impl RecordingStore {
    pub fn shared(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicU32::new(0),
            last_payload: Mutex::new(None),
            last_batch: Mutex::new(None),
            last_query: Mutex::new(None),
            query_items: Mutex::new(Vec::new()),
        })
    }

    /// Documents returned, unfiltered, by every query
    pub fn set_query_items(&self, items: Vec<Document>) {
        *self.query_items.lock() = items;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_payload(&self) -> Option<Fields> {
        self.last_payload.lock().clone()
    }

    pub fn last_batch(&self) -> Option<Vec<BatchOperation>> {
        self.last_batch.lock().clone()
    }

    pub fn last_query(&self) -> Option<QuerySpec> {
        self.last_query.lock().clone()
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_document(
        &self,
        _collection: &str,
        _doc_id: &str,
        _tenant_id: &str,
    ) -> StoreResult<Option<Document>> {
        self.hit();
        Ok(None)
    }

    async fn create_document(&self, collection: &str, data: Fields) -> StoreResult<Document> {
        self.hit();
        *self.last_payload.lock() = Some(data.clone());
        Document::from_payload(collection, "generated".to_string(), data)
    }

    async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        data: Fields,
    ) -> StoreResult<Document> {
        self.hit();
        *self.last_payload.lock() = Some(data.clone());
        Document::from_payload(collection, doc_id.to_string(), data)
    }

    async fn delete_document(
        &self,
        _collection: &str,
        _doc_id: &str,
        _tenant_id: &str,
    ) -> StoreResult<bool> {
        self.hit();
        Ok(false)
    }

    async fn query_documents(&self, query: &QuerySpec) -> StoreResult<QueryResult> {
        self.hit();
        *self.last_query.lock() = Some(query.clone());
        let items = self.query_items.lock().clone();
        let total = items.len();
        Ok(QueryResult {
            items: items.into_iter().take(query.limit).collect(),
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    async fn commit_batch(
        &self,
        operations: &[BatchOperation],
        _tenant_id: &str,
    ) -> StoreResult<()> {
        self.hit();
        *self.last_batch.lock() = Some(operations.to_vec());
        Ok(())
    }
}
