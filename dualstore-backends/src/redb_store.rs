//! Transactional store on redb
//!
//! Plays the secondary role: every document lives in one table keyed by
//! `collection \0 tenant \0 id` with the JSON-encoded document as value.
//! Batches run inside a single write transaction and are aborted as a whole
//! when any operation fails.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, Table, TableDefinition};
use tracing::{debug, info, warn};

use dualstore_core::document::{BatchOperation, Document, Fields, QueryResult, QuerySpec};
use dualstore_core::{DocumentStore, StoreError, StoreResult};

use crate::error::{join_error, BackendError, BackendResult};
use crate::records::{
    apply_update, check_key_part, checked_document_key, document_key, new_document, payload_tenant,
    tenant_range,
};

/// Documents table: composite key to JSON bytes
pub const DOCUMENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

type DocumentsTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

/// redb-backed [`DocumentStore`]
pub struct RedbStore {
    name: String,
    database: Arc<Database>,
}

impl RedbStore {
    /// Open or create a database file
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let database = Database::create(path).map_err(BackendError::from)?;
        info!(path = %path.display(), "Opened redb document store");
        Self::with_database("redb", Arc::new(database))
    }

    /// Database held entirely in memory
    pub fn in_memory() -> StoreResult<Self> {
        let database = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(BackendError::from)?;
        Self::with_database("redb-memory", Arc::new(database))
    }

    /// Wrap an existing database, creating the documents table if needed
    pub fn with_database(name: impl Into<String>, database: Arc<Database>) -> StoreResult<Self> {
        ensure_table(&database)?;
        Ok(Self {
            name: name.into(),
            database,
        })
    }

    /// Rename the store as it appears in logs
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    async fn blocking<T, F>(&self, task: F) -> StoreResult<T>
    where
        F: FnOnce(&Database) -> BackendResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.database.clone();
        tokio::task::spawn_blocking(move || task(&db))
            .await
            .map_err(join_error)?
            .map_err(StoreError::from)
    }
}

fn ensure_table(database: &Database) -> BackendResult<()> {
    let write_txn = database.begin_write()?;
    {
        write_txn.open_table(DOCUMENTS_TABLE)?;
    }
    write_txn.commit()?;
    Ok(())
}

fn load(table: &DocumentsTable<'_>, key: &str) -> BackendResult<Option<Document>> {
    match table.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
        None => Ok(None),
    }
}

fn save(table: &mut DocumentsTable<'_>, document: &Document) -> BackendResult<()> {
    let key = document_key(&document.collection, &document.tenant_id, &document.id);
    let bytes = serde_json::to_vec(document)?;
    table.insert(key.as_str(), bytes.as_slice())?;
    Ok(())
}

fn insert_new(
    table: &mut DocumentsTable<'_>,
    collection: &str,
    data: Fields,
) -> BackendResult<Document> {
    let document = new_document(collection, data)?;
    let key = checked_document_key(collection, &document.tenant_id, &document.id)?;
    if table.get(key.as_str())?.is_some() {
        return Err(StoreError::Conflict(format!("{}/{} already exists", collection, document.id)).into());
    }
    save(table, &document)?;
    Ok(document)
}

fn update_existing(
    table: &mut DocumentsTable<'_>,
    collection: &str,
    doc_id: &str,
    tenant_id: &str,
    data: Fields,
) -> BackendResult<Document> {
    let key = checked_document_key(collection, tenant_id, doc_id)?;
    let mut document = load(table, &key)?
        .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, doc_id)))?;
    apply_update(&mut document, data);
    save(table, &document)?;
    Ok(document)
}

fn remove(
    table: &mut DocumentsTable<'_>,
    collection: &str,
    doc_id: &str,
    tenant_id: &str,
) -> BackendResult<bool> {
    let key = checked_document_key(collection, tenant_id, doc_id)?;
    let removed = table.remove(key.as_str())?.is_some();
    Ok(removed)
}

fn apply_batch_operation(
    table: &mut DocumentsTable<'_>,
    operation: BatchOperation,
    tenant_id: &str,
) -> BackendResult<()> {
    check_key_part("collection", operation.collection())?;
    match operation {
        BatchOperation::Create { collection, data } => {
            insert_new(table, &collection, data)?;
        }
        BatchOperation::Update {
            collection,
            doc_id,
            data,
        } => {
            update_existing(table, &collection, &doc_id, tenant_id, data)?;
        }
        BatchOperation::Delete { collection, doc_id } => {
            remove(table, &collection, &doc_id, tenant_id)?;
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for RedbStore {
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

        self.blocking(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(DOCUMENTS_TABLE)?;

            match table.get(key.as_str())? {
                Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn create_document(&self, collection: &str, data: Fields) -> StoreResult<Document> {
        check_key_part("collection", collection)?;
        let collection = collection.to_string();

        let document = self
            .blocking(move |db| {
                let write_txn = db.begin_write()?;
                let document = {
                    let mut table = write_txn.open_table(DOCUMENTS_TABLE)?;
                    insert_new(&mut table, &collection, data)?
                };
                write_txn.commit()?;
                Ok(document)
            })
            .await?;

        debug!(store = %self.name, collection = %document.collection, doc_id = %document.id, "Created document");
        Ok(document)
    }

    async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        data: Fields,
    ) -> StoreResult<Document> {
        let tenant_id = payload_tenant(&data)?;
        let collection = collection.to_string();
        let doc_id = doc_id.to_string();

        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            let document = {
                let mut table = write_txn.open_table(DOCUMENTS_TABLE)?;
                update_existing(&mut table, &collection, &doc_id, &tenant_id, data)?
            };
            write_txn.commit()?;
            Ok(document)
        })
        .await
    }

    async fn delete_document(
        &self,
        collection: &str,
        doc_id: &str,
        tenant_id: &str,
    ) -> StoreResult<bool> {
        let collection = collection.to_string();
        let doc_id = doc_id.to_string();
        let tenant_id = tenant_id.to_string();

        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            let removed = {
                let mut table = write_txn.open_table(DOCUMENTS_TABLE)?;
                remove(&mut table, &collection, &doc_id, &tenant_id)?
            };
            write_txn.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn query_documents(&self, query: &QuerySpec) -> StoreResult<QueryResult> {
        check_key_part("collection", &query.collection)?;
        check_key_part("tenant_id", &query.tenant_id)?;
        let query = query.clone();

        self.blocking(move |db| {
            let (start, end) = tenant_range(&query.collection, &query.tenant_id);
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(DOCUMENTS_TABLE)?;

            let mut candidates = Vec::new();
            for entry in table.range::<&str>(start.as_str()..end.as_str())? {
                let (_, bytes) = entry?;
                let document: Document = serde_json::from_slice(bytes.value())?;
                candidates.push(document);
            }

            Ok(query.evaluate(candidates))
        })
        .await
    }

    async fn commit_batch(
        &self,
        operations: &[BatchOperation],
        tenant_id: &str,
    ) -> StoreResult<()> {
        check_key_part("tenant_id", tenant_id)?;
        let operations = operations.to_vec();
        let count = operations.len();
        let tenant = tenant_id.to_string();

        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            let outcome = {
                let mut table = write_txn.open_table(DOCUMENTS_TABLE)?;
                operations
                    .into_iter()
                    .try_for_each(|operation| apply_batch_operation(&mut table, operation, &tenant))
            };

            match outcome {
                Ok(()) => {
                    write_txn.commit()?;
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, "Batch failed, aborting transaction");
                    write_txn.abort()?;
                    Err(e)
                }
            }
        })
        .await?;

        debug!(store = %self.name, operations = count, tenant_id, "Committed batch");
        Ok(())
    }
}
