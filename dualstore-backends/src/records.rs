//! Write-path helpers shared by the concrete stores

use serde_json::Value;
use uuid::Uuid;

use dualstore_core::document::{
    timestamp_now, Document, Fields, CREATED_AT_FIELD, TENANT_FIELD, UPDATED_AT_FIELD,
};
use dualstore_core::{StoreError, StoreResult};

/// Build a new document from a create payload
///
/// Uses the payload's `id` if it is a non-empty string, otherwise a fresh
/// UUID. Timestamps are stamped unless the caller supplied them.
pub fn new_document(collection: &str, mut data: Fields) -> StoreResult<Document> {
    let id = match data.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        Some(Value::String(_)) | None | Some(Value::Null) => Uuid::new_v4().to_string(),
        Some(other) => {
            return Err(StoreError::InvalidArgument(format!(
                "document id must be a string, got {}",
                other
            )))
        }
    };

    let now = timestamp_now();
    data.entry(CREATED_AT_FIELD.to_string())
        .or_insert_with(|| Value::String(now.clone()));
    data.entry(UPDATED_AT_FIELD.to_string())
        .or_insert_with(|| Value::String(now));

    Document::from_payload(collection, id, data)
}

/// Tenant named by an update payload
pub fn payload_tenant(data: &Fields) -> StoreResult<String> {
    match data.get(TENANT_FIELD) {
        Some(Value::String(tenant)) if !tenant.trim().is_empty() => Ok(tenant.clone()),
        _ => Err(StoreError::InvalidArgument(
            "update payload has no tenant_id".to_string(),
        )),
    }
}

/// Merge an update payload and refresh `updated_at`
pub fn apply_update(document: &mut Document, mut data: Fields) {
    data.insert(
        UPDATED_AT_FIELD.to_string(),
        Value::String(timestamp_now()),
    );
    document.merge(data);
}

/// Composite key `collection \0 tenant \0 id`
pub fn document_key(collection: &str, tenant_id: &str, doc_id: &str) -> String {
    format!("{}\0{}\0{}", collection, tenant_id, doc_id)
}

/// [`document_key`] after rejecting parts that would alias another key
///
/// Without this, `("a\0b", "c")` and `("a", "b\0c")` collide and one
/// tenant could reach another tenant's document.
pub fn checked_document_key(collection: &str, tenant_id: &str, doc_id: &str) -> StoreResult<String> {
    check_key_part("collection", collection)?;
    check_key_part("tenant_id", tenant_id)?;
    check_key_part("id", doc_id)?;
    Ok(document_key(collection, tenant_id, doc_id))
}

/// Half-open key range covering every document of one tenant in a collection
pub fn tenant_range(collection: &str, tenant_id: &str) -> (String, String) {
    (
        format!("{}\0{}\0", collection, tenant_id),
        format!("{}\0{}\u{1}", collection, tenant_id),
    )
}

/// Reject identifiers that would break composite keys
pub fn check_key_part(name: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() || value.contains('\0') {
        return Err(StoreError::InvalidArgument(format!(
            "{} must be non-empty and free of NUL bytes",
            name
        )));
    }
    Ok(())
}
