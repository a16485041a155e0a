//! Fluent query construction
//!
//! [`QueryBuilder`] records filters, ordering, pagination and projection for
//! one `(collection, tenant)` pair. Nothing touches a store until a terminal
//! method (`get`, `get_first`, `count`, `exists`, `fetch`) runs.
//!
//! ```ignore
//! let partners = client
//!     .query_builder("partners", "t1")
//!     .where_eq("active", true)
//!     .where_eq("category", "food")
//!     .order("trade_name", SortDirection::Asc)
//!     .limit(10)
//!     .get()
//!     .await?;
//! ```

use chrono::{SecondsFormat, TimeDelta, Utc};
use serde_json::Value;

use crate::client::UnifiedDataClient;
use crate::document::{
    Document, Filter, FilterOp, OrderBy, QueryResult, QuerySpec, SortDirection, CREATED_AT_FIELD,
};
use crate::error::DataResult;

/// Chainable query specification bound to a client
#[derive(Debug, Clone)]
pub struct QueryBuilder<'a> {
    client: &'a UnifiedDataClient,
    spec: QuerySpec,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(
        client: &'a UnifiedDataClient,
        collection: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            spec: QuerySpec::new(collection, tenant_id),
        }
    }

    /// Add a `(field, operator, value)` clause
    #[doc(alias = "where")]
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.spec.filters.push(Filter::new(field, op, value));
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn where_in<V>(self, field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<Value>,
    {
        self.filter(field, FilterOp::In, collect_array(values))
    }

    pub fn where_not_in<V>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self
    where
        V: Into<Value>,
    {
        self.filter(field, FilterOp::NotIn, collect_array(values))
    }

    pub fn where_array_contains(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::ArrayContains, value)
    }

    /// Inclusive range, recorded as a `>=` and a `<=` clause
    pub fn where_between(
        self,
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        let field = field.into();
        self.filter(field.clone(), FilterOp::Ge, low)
            .filter(field, FilterOp::Le, high)
    }

    pub fn order(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.spec.order_by.push(OrderBy::new(field, direction));
        self
    }

    pub fn order_by_desc(self, field: impl Into<String>) -> Self {
        self.order(field, SortDirection::Desc)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.spec.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.spec.offset = offset;
        self
    }

    /// Restrict returned fields; the document envelope is always kept
    pub fn select<S>(mut self, fields: impl IntoIterator<Item = S>) -> Self
    where
        S: Into<String>,
    {
        self.spec.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// One-based page of `size` documents; page 0 is treated as page 1
    pub fn page(self, page: usize, size: usize) -> Self {
        let offset = page.saturating_sub(1).saturating_mul(size);
        self.limit(size).offset(offset)
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn into_spec(self) -> QuerySpec {
        self.spec
    }

    /// Execute and return the full page with its total
    pub async fn fetch(&self) -> DataResult<QueryResult> {
        self.client.query(&self.spec).await
    }

    pub async fn get(&self) -> DataResult<Vec<Document>> {
        Ok(self.fetch().await?.items)
    }

    pub async fn get_first(&self) -> DataResult<Option<Document>> {
        let mut spec = self.spec.clone();
        spec.limit = 1;
        Ok(self.client.query(&spec).await?.items.into_iter().next())
    }

    /// Number of matching documents, ignoring limit and offset
    ///
    /// Requests an empty page and reads the store-reported total, so no
    /// documents are materialized.
    pub async fn count(&self) -> DataResult<usize> {
        let mut spec = self.spec.clone();
        spec.limit = 0;
        spec.offset = 0;
        Ok(self.client.query(&spec).await?.total)
    }

    pub async fn exists(&self) -> DataResult<bool> {
        Ok(self.count().await? > 0)
    }
}

fn collect_array<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Value {
    Value::Array(values.into_iter().map(Into::into).collect())
}

/// Common lookups expressed through the query builder
#[derive(Debug, Clone, Copy)]
pub struct SearchHelper<'a> {
    client: &'a UnifiedDataClient,
}

impl<'a> SearchHelper<'a> {
    pub fn new(client: &'a UnifiedDataClient) -> Self {
        Self { client }
    }

    pub async fn find_by_id(
        &self,
        collection: &str,
        doc_id: &str,
        tenant_id: &str,
    ) -> DataResult<Option<Document>> {
        self.client.get_document(collection, doc_id, tenant_id).await
    }

    pub async fn find_by_field(
        &self,
        collection: &str,
        tenant_id: &str,
        field: &str,
        value: impl Into<Value>,
        limit: usize,
    ) -> DataResult<Vec<Document>> {
        self.client
            .query_builder(collection, tenant_id)
            .where_eq(field, value)
            .limit(limit)
            .get()
            .await
    }

    /// Documents flagged `active == true`, newest first
    pub async fn find_active(
        &self,
        collection: &str,
        tenant_id: &str,
        limit: usize,
    ) -> DataResult<Vec<Document>> {
        self.client
            .query_builder(collection, tenant_id)
            .where_eq("active", true)
            .order_by_desc(CREATED_AT_FIELD)
            .limit(limit)
            .get()
            .await
    }

    /// Documents created within the last `days` days, newest first
    pub async fn find_recent(
        &self,
        collection: &str,
        tenant_id: &str,
        days: u32,
        limit: usize,
    ) -> DataResult<Vec<Document>> {
        let mut query = self.client.query_builder(collection, tenant_id);
        // windows reaching past chrono's range cover every document
        if let Some(cutoff) = recent_cutoff(days) {
            query = query.filter(CREATED_AT_FIELD, FilterOp::Ge, cutoff);
        }

        query
            .order_by_desc(CREATED_AT_FIELD)
            .limit(limit)
            .get()
            .await
    }
}

fn recent_cutoff(days: u32) -> Option<String> {
    let window = TimeDelta::try_days(i64::from(days))?;
    Utc::now()
        .checked_sub_signed(window)
        .map(|cutoff| cutoff.to_rfc3339_opts(SecondsFormat::Millis, true))
}
