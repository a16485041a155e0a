//! Store adapters for dualstore
//!
//! - [`MemoryDocumentStore`]: sharded in-memory primary
//! - [`RedbStore`]: transactional secondary on redb
//! - [`FaultInjectingStore`]: decorator that fails or delays on demand

pub mod error;
pub mod faulty;
pub mod memory;
pub mod records;
pub mod redb_store;

pub use error::{BackendError, BackendResult};
pub use faulty::{FaultInjectingStore, FaultMode};
pub use memory::MemoryDocumentStore;
pub use redb_store::RedbStore;
