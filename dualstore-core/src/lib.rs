//! Data access resilience layer
//!
//! Mediates every read and write between application code and two
//! independent stores: a primary document store and a secondary relational
//! fallback. Persistent primary failures open a circuit breaker that diverts
//! traffic to the secondary until the primary recovers.
//!
//! Data flow:
//!
//! ```text
//! caller ─▶ QueryBuilder ─▶ UnifiedDataClient ─▶ retry ─▶ breaker gate
//!                                                          │
//!                                   primary ◀──────────────┤
//!                                      │ failure           │ open
//!                                      ▼                   ▼
//!                                   secondary ◀────────────┘
//! ```

pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod observability;
pub mod query;
pub mod retry;
pub mod store;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitBreakerState,
    CircuitBreakerStats,
};
pub use client::UnifiedDataClient;
pub use config::DataLayerConfig;
pub use document::{
    BatchOperation, Document, Fields, Filter, FilterOp, OrderBy, QueryResult, QuerySpec,
    SortDirection,
};
pub use error::{classify, DataError, DataResult, ErrorKind, StoreError, StoreResult};
pub use query::{QueryBuilder, SearchHelper};
pub use retry::{retry_with_backoff, safe_execute, RetryPolicy};
pub use store::DocumentStore;
pub use validation::validate_required_fields;
