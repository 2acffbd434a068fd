//! # kvcas
//!
//! An in-process, string-keyed key-value store with single-key atomic
//! primitives and an optimistic multi-key transaction protocol built on them.
//!
//! ## Core Concepts
//!
//! - **Storage**: put, get, prefix scan, put-if-absent, compare-and-swap,
//!   delete and clear, each atomic for the key it touches
//! - **Snapshot**: the values (or absence) of a set of condition keys
//! - **Completion**: writes computed values only where condition keys are
//!   unchanged, with no cross-key rollback
//! - **Runner**: snapshot, compute, complete, retrying on contention
//!
//! ## Example
//!
//! ```ignore
//! use kvcas::{KeyedValue, MemoryStorage, Snapshot, Storage, TransactionRequest, Transactional};
//!
//! let store = MemoryStorage::new();
//! store.put("config/replicas", "3")?;
//! store.put("config/version", "7")?;
//!
//! // Bump both keys together, only if neither changed underneath us
//! let request = TransactionRequest::new(
//!     ["config/replicas", "config/version"],
//!     |snap: &Snapshot| {
//!         let version: u64 = snap.value("config/version").unwrap_or("0").parse()?;
//!         Ok(vec![
//!             KeyedValue::new("config/replicas", "5"),
//!             KeyedValue::new("config/version", (version + 1).to_string()),
//!         ])
//!     },
//! )
//! .retry_until_resolved(true);
//!
//! assert!(store.execute(&request)?);
//! ```

pub mod error;
pub mod storage;
pub mod txn;
pub mod types;

// Re-exports
pub use error::{Result, StoreError, UpdateError};
pub use storage::{FileStorage, FileStorageConfig, MemoryStorage, Storage};
pub use txn::{
    begin_transaction, complete_transaction, execute, execute_detailed, ExecuteOutcome,
    RetryPolicy, Snapshot, SnapshotPolicy, TransactionRequest, Transactional,
};
pub use types::KeyedValue;
