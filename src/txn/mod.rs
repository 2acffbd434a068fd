//! Optimistic multi-key transactions over any [`Storage`].
//!
//! A transaction reads a set of condition keys into a [`Snapshot`], hands the
//! snapshot to a pure update function, then writes the result only if every
//! condition key still holds the value it had when read:
//!
//! ```text
//! begin_transaction(keys)          -> Snapshot
//! update(&Snapshot)                -> Vec<KeyedValue>
//! complete_transaction(snap, vals) -> bool   (false = contention)
//! ```
//!
//! Keys are re-checked and written one at a time. A transaction that fails
//! on its second key leaves the first key's new value in place; nothing is
//! rolled back. Isolation is per-key compare-and-swap, nothing stronger.
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStorage::new();
//! store.put("counter", "0")?;
//!
//! let request = TransactionRequest::new(["counter"], |snap: &Snapshot| {
//!     let n: u64 = snap.value("counter").unwrap_or("0").parse()?;
//!     Ok(vec![KeyedValue::new("counter", (n + 1).to_string())])
//! })
//! .retry_until_resolved(true);
//!
//! assert!(store.execute(&request)?);
//! ```

mod complete;
mod retry;
mod runner;
mod snapshot;

pub use complete::complete_transaction;
pub use retry::RetryPolicy;
pub use runner::{execute, execute_detailed, ExecuteOutcome, SnapshotPolicy, TransactionRequest};
pub use snapshot::{begin_transaction, Snapshot};

use crate::error::{Result, UpdateError};
use crate::storage::Storage;
use crate::types::KeyedValue;

/// Transaction operations as methods on every [`Storage`].
pub trait Transactional: Storage {
    /// See [`begin_transaction`].
    fn begin_transaction<K: AsRef<str>>(&self, condition_keys: &[K]) -> Result<Snapshot> {
        begin_transaction(self, condition_keys)
    }

    /// See [`complete_transaction`].
    fn complete_transaction(&self, snapshot: &Snapshot, desired: &[KeyedValue]) -> Result<bool> {
        complete_transaction(self, snapshot, desired)
    }

    /// See [`execute`].
    fn execute<F>(&self, request: &TransactionRequest<F>) -> Result<bool>
    where
        F: Fn(&Snapshot) -> std::result::Result<Vec<KeyedValue>, UpdateError>,
    {
        execute(self, request)
    }

    /// See [`execute_detailed`].
    fn execute_detailed<F>(&self, request: &TransactionRequest<F>) -> Result<ExecuteOutcome>
    where
        F: Fn(&Snapshot) -> std::result::Result<Vec<KeyedValue>, UpdateError>,
    {
        execute_detailed(self, request)
    }
}

impl<S: Storage + ?Sized> Transactional for S {}
