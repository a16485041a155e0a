//! In-memory document store
//!
//! Sharded map of documents used as the primary store in tests and local
//! runs. Single-document operations run concurrently; a batch holds the
//! exclusive side of `batch_gate` so it is applied all-or-nothing.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use dualstore_core::document::{BatchOperation, Document, Fields, QueryResult, QuerySpec};
use dualstore_core::{DocumentStore, StoreError, StoreResult};

use crate::records::{
    apply_update, check_key_part, checked_document_key, new_document, payload_tenant,
};

/// [`DocumentStore`] held in a [`DashMap`]
pub struct MemoryDocumentStore {
    name: String,
    documents: DashMap<String, Document>,
    batch_gate: RwLock<()>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: DashMap::new(),
            batch_gate: RwLock::new(()),
        }
    }

    /// Number of stored documents across all collections and tenants
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn insert_new(&self, collection: &str, data: Fields) -> StoreResult<Document> {
        let document = new_document(collection, data)?;
        let key = checked_document_key(collection, &document.tenant_id, &document.id)?;

        match self.documents.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "{}/{} already exists",
                collection, document.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(document.clone());
                Ok(document)
            }
        }
    }
}

/// Pending batch writes layered over the committed map
struct Staging<'a> {
    committed: &'a DashMap<String, Document>,
    changes: HashMap<String, Option<Document>>,
}

impl<'a> Staging<'a> {
    fn new(committed: &'a DashMap<String, Document>) -> Self {
        Self {
            committed,
            changes: HashMap::new(),
        }
    }

    fn current(&self, key: &str) -> Option<Document> {
        match self.changes.get(key) {
            Some(staged) => staged.clone(),
            None => self.committed.get(key).map(|entry| entry.value().clone()),
        }
    }

    fn stage(&mut self, operation: &BatchOperation, tenant_id: &str) -> StoreResult<()> {
        match operation {
            BatchOperation::Create { collection, data } => {
                let document = new_document(collection, data.clone())?;
                let key = checked_document_key(collection, &document.tenant_id, &document.id)?;
                if self.current(&key).is_some() {
                    return Err(StoreError::Conflict(format!(
                        "{}/{} already exists",
                        collection, document.id
                    )));
                }
                self.changes.insert(key, Some(document));
            }
            BatchOperation::Update {
                collection,
                doc_id,
                data,
            } => {
                let key = checked_document_key(collection, tenant_id, doc_id)?;
                let mut document = self
                    .current(&key)
                    .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, doc_id)))?;
                apply_update(&mut document, data.clone());
                self.changes.insert(key, Some(document));
            }
            BatchOperation::Delete { collection, doc_id } => {
                let key = checked_document_key(collection, tenant_id, doc_id)?;
                self.changes.insert(key, None);
            }
        }
        Ok(())
    }

    fn apply(self) {
        for (key, change) in self.changes {
            match change {
                Some(document) => {
                    self.committed.insert(key, document);
                }
                None => {
                    self.committed.remove(&key);
                }
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
        tenant_id: &str,
    ) -> StoreResult<Option<Document>> {
        let key = checked_document_key(collection, tenant_id, doc_id)?;
        let _gate = self.batch_gate.read();
        Ok(self.documents.get(&key).map(|entry| entry.value().clone()))
    }

    async fn create_document(&self, collection: &str, data: Fields) -> StoreResult<Document> {
        let _gate = self.batch_gate.read();
        self.insert_new(collection, data)
    }

    async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        data: Fields,
    ) -> StoreResult<Document> {
        let tenant_id = payload_tenant(&data)?;
        let key = checked_document_key(collection, &tenant_id, doc_id)?;
        let _gate = self.batch_gate.read();

        let mut entry = self
            .documents
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, doc_id)))?;
        apply_update(entry.value_mut(), data);
        Ok(entry.value().clone())
    }

    async fn delete_document(
        &self,
        collection: &str,
        doc_id: &str,
        tenant_id: &str,
    ) -> StoreResult<bool> {
        let key = checked_document_key(collection, tenant_id, doc_id)?;
        let _gate = self.batch_gate.read();
        Ok(self.documents.remove(&key).is_some())
    }

    async fn query_documents(&self, query: &QuerySpec) -> StoreResult<QueryResult> {
        check_key_part("collection", &query.collection)?;
        check_key_part("tenant_id", &query.tenant_id)?;
        let _gate = self.batch_gate.read();
        let candidates: Vec<Document> = self
            .documents
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(query.evaluate(candidates))
    }

    async fn commit_batch(
        &self,
        operations: &[BatchOperation],
        tenant_id: &str,
    ) -> StoreResult<()> {
        check_key_part("tenant_id", tenant_id)?;
        let _gate = self.batch_gate.write();
        let mut staging = Staging::new(&self.documents);
        for operation in operations {
            staging.stage(operation, tenant_id)?;
        }
        staging.apply();

        debug!(store = %self.name, operations = operations.len(), tenant_id, "Committed batch");
        Ok(())
    }
}
