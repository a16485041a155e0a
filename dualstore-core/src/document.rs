//! Data model shared by the client, the query builder and store adapters

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DataError, StoreError};

/// Open field map of a document payload
pub type Fields = serde_json::Map<String, Value>;

/// Keys owned by the document envelope rather than its field map
pub const RESERVED_KEYS: &[&str] = &["id", "collection", "tenant_id"];

pub const TENANT_FIELD: &str = "tenant_id";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Default page size for queries
pub const DEFAULT_QUERY_LIMIT: usize = 20;

/// Current time as RFC 3339 UTC text, sortable lexicographically
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Logical unit of storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub tenant_id: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Document {
    /// Build a document from a write payload that carries its tenant
    ///
    /// Reserved keys are lifted out of the payload into the envelope.
    pub fn from_payload(collection: &str, id: String, mut data: Fields) -> Result<Self, StoreError> {
        let tenant_id = match data.remove(TENANT_FIELD) {
            Some(Value::String(tenant)) if !tenant.trim().is_empty() => tenant,
            _ => {
                return Err(StoreError::InvalidArgument(format!(
                    "payload for '{}' has no tenant_id",
                    collection
                )))
            }
        };
        data.remove("id");
        data.remove("collection");

        Ok(Self {
            id,
            collection: collection.to_string(),
            tenant_id,
            fields: data,
        })
    }

    /// Look up a field, including the envelope keys
    pub fn field(&self, name: &str) -> Option<Cow<'_, Value>> {
        match name {
            "id" => Some(Cow::Owned(Value::String(self.id.clone()))),
            "collection" => Some(Cow::Owned(Value::String(self.collection.clone()))),
            TENANT_FIELD => Some(Cow::Owned(Value::String(self.tenant_id.clone()))),
            _ => self.fields.get(name).map(Cow::Borrowed),
        }
    }

    /// Merge a partial update into the field map
    pub fn merge(&mut self, data: Fields) {
        for (key, value) in data {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                self.fields.insert(key, value);
            }
        }
    }

    /// Keep only the selected fields; the envelope always survives
    pub fn project(mut self, select: &[String]) -> Self {
        if !select.is_empty() {
            self.fields.retain(|key, _| select.iter().any(|s| s == key));
        }
        self
    }
}

/// Comparison operator of a filter clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::In => "in",
            FilterOp::NotIn => "not-in",
            FilterOp::ArrayContains => "array-contains",
            FilterOp::ArrayContainsAny => "array-contains-any",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(FilterOp::Eq),
            "!=" => Ok(FilterOp::Ne),
            "<" => Ok(FilterOp::Lt),
            "<=" => Ok(FilterOp::Le),
            ">" => Ok(FilterOp::Gt),
            ">=" => Ok(FilterOp::Ge),
            "in" => Ok(FilterOp::In),
            "not-in" => Ok(FilterOp::NotIn),
            "array-contains" => Ok(FilterOp::ArrayContains),
            "array-contains-any" => Ok(FilterOp::ArrayContainsAny),
            other => Err(DataError::validation(format!("unknown filter operator '{}'", other))),
        }
    }
}

/// One `(field, operator, value)` clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluate the clause against a document
    ///
    /// A document lacking the field never matches, whatever the operator.
    pub fn matches(&self, document: &Document) -> bool {
        let Some(actual) = document.field(&self.field) else {
            return false;
        };
        let actual = actual.as_ref();

        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Ne => !values_equal(actual, &self.value),
            FilterOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Le => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Ge => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::In => as_slice(&self.value)
                .iter()
                .any(|candidate| values_equal(actual, candidate)),
            FilterOp::NotIn => !as_slice(&self.value)
                .iter()
                .any(|candidate| values_equal(actual, candidate)),
            FilterOp::ArrayContains => as_slice(actual)
                .iter()
                .any(|element| values_equal(element, &self.value)),
            FilterOp::ArrayContainsAny => as_slice(actual).iter().any(|element| {
                as_slice(&self.value)
                    .iter()
                    .any(|candidate| values_equal(element, candidate))
            }),
        }
    }
}

fn as_slice(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items,
        _ => &[],
    }
}

/// Equality that treats `1` and `1.0` as the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Ordering between two values of the same scalar type
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting; missing fields sort as null
pub fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    compare_values(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

/// Sort direction of an order clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(DataError::validation(format!("unknown sort direction '{}'", other))),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => f.write_str("asc"),
            SortDirection::Desc => f.write_str("desc"),
        }
    }
}

/// One `(field, direction)` sort clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Desc)
    }
}

/// Complete description of a query, side-effect free until executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub collection: String,
    pub tenant_id: String,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: usize,
    pub offset: usize,
    pub select: Option<Vec<String>>,
}

impl QuerySpec {
    pub fn new(collection: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            tenant_id: tenant_id.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
            select: None,
        }
    }

    /// Whether a document satisfies every filter of this spec
    pub fn matches(&self, document: &Document) -> bool {
        document.collection == self.collection
            && document.tenant_id == self.tenant_id
            && self.filters.iter().all(|filter| filter.matches(document))
    }

    /// Order documents by the sort clauses, in priority order
    pub fn sort(&self, documents: &mut [Document]) {
        if self.order_by.is_empty() {
            return;
        }
        documents.sort_by(|a, b| {
            for clause in &self.order_by {
                let left = a.field(&clause.field);
                let right = b.field(&clause.field);
                let ordering = sort_cmp(left.as_deref(), right.as_deref());
                let ordering = match clause.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    /// Filter, sort, paginate and project an unordered candidate set
    pub fn evaluate(&self, candidates: impl IntoIterator<Item = Document>) -> QueryResult {
        let mut matched: Vec<Document> = candidates
            .into_iter()
            .filter(|document| self.matches(document))
            .collect();
        self.sort(&mut matched);

        let total = matched.len();
        let select = self.select.as_deref().unwrap_or(&[]);
        let items = matched
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .map(|document| document.project(select))
            .collect();

        QueryResult {
            items,
            total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub items: Vec<Document>,
    /// Number of matches before pagination
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// A single write inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BatchOperation {
    Create {
        collection: String,
        data: Fields,
    },
    Update {
        collection: String,
        doc_id: String,
        data: Fields,
    },
    Delete {
        collection: String,
        doc_id: String,
    },
}

impl BatchOperation {
    pub fn collection(&self) -> &str {
        match self {
            BatchOperation::Create { collection, .. }
            | BatchOperation::Update { collection, .. }
            | BatchOperation::Delete { collection, .. } => collection,
        }
    }

    pub fn doc_id(&self) -> Option<&str> {
        match self {
            BatchOperation::Create { .. } => None,
            BatchOperation::Update { doc_id, .. } | BatchOperation::Delete { doc_id, .. } => {
                Some(doc_id)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BatchOperation::Create { .. } => "create",
            BatchOperation::Update { .. } => "update",
            BatchOperation::Delete { .. } => "delete",
        }
    }
}
